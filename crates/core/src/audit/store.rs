use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Which audit records to return.
///
/// The keys are the ones an operator reconstructs a night from: the job, the exposure
/// (`image_id`, which spans every device's job for that image) and the device role.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub job_num: Option<String>,
    pub image_id: Option<String>,
    pub event_type: Option<String>,
    /// Device role; compared case-insensitively.
    pub device: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            job_num: None,
            image_id: None,
            event_type: None,
            device: None,
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_num(mut self, job_num: impl Into<String>) -> Self {
        self.job_num = Some(job_num.into());
        self
    }

    /// Every event about one exposure, across devices and retries.
    pub fn with_image_id(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = Some(image_id.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into().to_ascii_uppercase());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether `record` passes every set condition. Paging is not applied.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        fn field_ok(want: &Option<String>, have: &Option<String>) -> bool {
            want.as_ref().is_none_or(|w| have.as_deref() == Some(w.as_str()))
        }

        field_ok(&self.job_num, &record.job_num)
            && field_ok(&self.image_id, &record.image_id)
            && self
                .event_type
                .as_ref()
                .is_none_or(|t| &record.event_type == t)
            && self.device.as_ref().is_none_or(|d| {
                record
                    .device
                    .as_deref()
                    .is_some_and(|have| have.eq_ignore_ascii_case(d))
            })
            && self.from.is_none_or(|from| record.timestamp >= from)
            && self.to.is_none_or(|to| record.timestamp <= to)
    }
}

/// Append-only storage for audit records.
pub trait AuditStore: Send + Sync {
    /// Insert a record and return its assigned id.
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Newest first, paged by the filter's limit and offset.
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}
