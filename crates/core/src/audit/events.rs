use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backlog::BacklogReason;
use crate::device::{DeviceCommand, DeviceRole, DeviceState};
use crate::job::JobState;

/// Something the coordinator did that an operator may want to reconstruct later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    ServiceStarted {
        version: String,
        config_hash: String,
    },

    ServiceStopped {
        reason: String,
    },

    SessionStarted {
        session_id: String,
    },

    VisitStarted {
        visit_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bore_sight: Option<String>,
    },

    /// A device command was applied.
    DeviceTransition {
        device: DeviceRole,
        command: DeviceCommand,
        from_state: DeviceState,
        to_state: DeviceState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cfg_key: Option<String>,
    },

    /// A device command failed validation. State is untouched.
    CommandRejected {
        device: DeviceRole,
        command: DeviceCommand,
        reason: String,
    },

    JobCreated {
        job_num: String,
        device: DeviceRole,
        image_id: String,
        attempt: u32,
        units: usize,
    },

    JobStateChanged {
        job_num: String,
        image_id: String,
        device: DeviceRole,
        from_state: JobState,
        to_state: JobState,
    },

    /// An ack request reached its deadline short of responses.
    AckTimedOut {
        ack_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_num: Option<String>,
        expected: usize,
        received: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<String>,
    },

    BacklogAdded {
        entry_id: u64,
        job_num: String,
        image_id: String,
        device: DeviceRole,
        units: Vec<String>,
        reason: BacklogReason,
    },

    /// A backlog entry was handed to a retry job.
    BacklogResolved {
        entry_id: u64,
        job_num: String,
        device: DeviceRole,
        retry_job_num: String,
    },

    /// A backlog entry exhausted its retries.
    BacklogDropped {
        entry_id: u64,
        job_num: String,
        device: DeviceRole,
        retry_count: u32,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::SessionStarted { .. } => "session_started",
            Self::VisitStarted { .. } => "visit_started",
            Self::DeviceTransition { .. } => "device_transition",
            Self::CommandRejected { .. } => "command_rejected",
            Self::JobCreated { .. } => "job_created",
            Self::JobStateChanged { .. } => "job_state_changed",
            Self::AckTimedOut { .. } => "ack_timed_out",
            Self::BacklogAdded { .. } => "backlog_added",
            Self::BacklogResolved { .. } => "backlog_resolved",
            Self::BacklogDropped { .. } => "backlog_dropped",
        }
    }

    /// The job this event concerns, if any.
    pub fn job_num(&self) -> Option<&str> {
        match self {
            Self::JobCreated { job_num, .. }
            | Self::JobStateChanged { job_num, .. }
            | Self::BacklogAdded { job_num, .. }
            | Self::BacklogResolved { job_num, .. }
            | Self::BacklogDropped { job_num, .. } => Some(job_num),
            Self::AckTimedOut { job_num, .. } => job_num.as_deref(),
            _ => None,
        }
    }

    /// The exposure this event concerns, if any.
    pub fn image_id(&self) -> Option<&str> {
        match self {
            Self::JobCreated { image_id, .. }
            | Self::JobStateChanged { image_id, .. }
            | Self::BacklogAdded { image_id, .. } => Some(image_id),
            _ => None,
        }
    }

    /// The device this event concerns, if any.
    pub fn device(&self) -> Option<DeviceRole> {
        match self {
            Self::DeviceTransition { device, .. }
            | Self::CommandRejected { device, .. }
            | Self::JobCreated { device, .. }
            | Self::JobStateChanged { device, .. }
            | Self::BacklogAdded { device, .. }
            | Self::BacklogResolved { device, .. }
            | Self::BacklogDropped { device, .. } => Some(*device),
            _ => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub job_num: Option<String>,
    pub image_id: Option<String>,
    pub device: Option<String>,
    pub data: AuditEvent,
}

impl AuditRecord {
    /// Build an unsaved record; the store assigns `id`.
    pub fn from_event(timestamp: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            job_num: event.job_num().map(String::from),
            image_id: event.image_id().map(String::from),
            device: event.device().map(|d| d.to_string()),
            data: event,
        }
    }
}
