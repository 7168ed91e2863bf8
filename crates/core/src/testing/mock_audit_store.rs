//! In-memory audit store for tests.

use std::sync::Mutex;

use crate::audit::{AuditError, AuditFilter, AuditRecord, AuditStore};

/// Keeps every inserted record in memory.
///
/// Queries honour the same filters and newest-first ordering as the SQLite store.
#[derive(Debug, Default)]
pub struct MockAuditStore {
    records: Mutex<Vec<AuditRecord>>,
}

impl MockAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in insertion order.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Event types in insertion order.
    pub fn event_types(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .map(|r| r.event_type)
            .collect()
    }

    fn matching(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self
            .records
            .lock()
            .map_err(|e| AuditError::Database(e.to_string()))?;
        let mut matching: Vec<AuditRecord> = records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(matching)
    }
}

impl AuditStore for MockAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| AuditError::Database(e.to_string()))?;
        let id = records.len() as i64 + 1;
        let mut stored = record.clone();
        stored.id = id;
        records.push(stored);
        Ok(id)
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self
            .matching(filter)?
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        Ok(self.matching(filter)?.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::audit::AuditEvent;

    fn session(id: &str) -> AuditRecord {
        AuditRecord::from_event(
            Utc::now(),
            AuditEvent::SessionStarted {
                session_id: id.to_string(),
            },
        )
    }

    #[test]
    fn test_insert_assigns_ids_and_query_is_newest_first() {
        let store = MockAuditStore::new();
        assert_eq!(store.insert(&session("1")).unwrap(), 1);
        assert_eq!(store.insert(&session("2")).unwrap(), 2);

        let records = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(records[0].id, 2);
        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 2);
        assert_eq!(
            store
                .count(&AuditFilter::new().with_event_type("job_created"))
                .unwrap(),
            0
        );
    }
}
