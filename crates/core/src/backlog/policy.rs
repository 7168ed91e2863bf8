//! Selection policies for the next backlog entry to retry.

use super::types::BacklogEntry;

/// Chooses which backlog entry is retried next.
pub trait BacklogPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select<'a>(&self, entries: &'a [BacklogEntry]) -> Option<&'a BacklogEntry>;
}

/// Oldest entry first.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoPolicy;

impl BacklogPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select<'a>(&self, entries: &'a [BacklogEntry]) -> Option<&'a BacklogEntry> {
        entries.iter().min_by_key(|e| (e.added_at, e.id))
    }
}

/// Highest priority first; ties go to the oldest entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityPolicy;

impl BacklogPolicy for PriorityPolicy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select<'a>(&self, entries: &'a [BacklogEntry]) -> Option<&'a BacklogEntry> {
        entries
            .iter()
            .min_by_key(|e| (std::cmp::Reverse(e.priority), e.added_at, e.id))
    }
}

/// Look up a policy by its configured name.
pub fn policy_by_name(name: &str) -> Option<Box<dyn BacklogPolicy>> {
    match name {
        "fifo" => Some(Box::new(FifoPolicy)),
        "priority" => Some(Box::new(PriorityPolicy)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::BacklogReason;
    use crate::device::DeviceRole;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(id: u64, priority: i32, age_secs: i64) -> BacklogEntry {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        BacklogEntry {
            id,
            orig_job_num: format!("1_{}", id),
            units: vec!["R01/S00".into()],
            device: DeviceRole::Ar,
            session_id: "1".into(),
            image_id: "IMG".into(),
            visit_id: None,
            priority,
            reason: BacklogReason::TransferFailed,
            added_at: base - Duration::seconds(age_secs),
            retry_count: 0,
        }
    }

    #[test]
    fn test_fifo_picks_oldest() {
        let entries = vec![entry(1, 9, 10), entry(2, 0, 30), entry(3, 5, 20)];
        assert_eq!(FifoPolicy.select(&entries).unwrap().id, 2);
    }

    #[test]
    fn test_priority_then_age() {
        let entries = vec![entry(1, 5, 10), entry(2, 0, 30), entry(3, 5, 20)];
        assert_eq!(PriorityPolicy.select(&entries).unwrap().id, 3);
    }

    #[test]
    fn test_empty() {
        assert!(FifoPolicy.select(&[]).is_none());
        assert!(PriorityPolicy.select(&[]).is_none());
    }

    #[test]
    fn test_policy_by_name() {
        assert_eq!(policy_by_name("priority").unwrap().name(), "priority");
        assert!(policy_by_name("random").is_none());
    }
}
