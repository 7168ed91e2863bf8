use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backlog::ResultCode;
use crate::device::DeviceRole;
use crate::partition::WorkAssignment;
use crate::scoreboard::ScoreboardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Dispatched,
    TakeImages,
    Readout,
    Complete,
    Failed,
    Refused,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Refused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Dispatched => "DISPATCHED",
            JobState::TakeImages => "TAKE_IMAGES",
            JobState::Readout => "READOUT",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
            JobState::Refused => "REFUSED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device's share of work for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_num: String,
    pub session_id: String,
    pub image_id: String,
    pub visit_id: Option<String>,
    pub device: DeviceRole,
    /// CCD unit ids this job is responsible for moving.
    #[serde(default)]
    pub units: Vec<String>,
    pub assignment: WorkAssignment,
    pub state: JobState,
    /// Per-CCD outcome, keyed by unit id.
    pub results: BTreeMap<String, ResultCode>,
    /// 0 for a first dispatch, n for the n-th backlog retry.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Units whose recorded result is a failure.
    pub fn failed_units(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|(_, code)| code.is_failure())
            .map(|(unit, _)| unit.clone())
            .collect()
    }

    /// Forwarders named in the job's assignment.
    pub fn forwarders(&self) -> Vec<String> {
        self.assignment.workers().map(str::to_string).collect()
    }
}

/// Parameters for a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub session_id: String,
    pub image_id: String,
    pub visit_id: Option<String>,
    pub device: DeviceRole,
    pub units: Vec<String>,
    pub assignment: WorkAssignment,
    pub attempt: u32,
}

impl CreateJobRequest {
    pub fn new(session_id: impl Into<String>, image_id: impl Into<String>, device: DeviceRole) -> Self {
        Self {
            session_id: session_id.into(),
            image_id: image_id.into(),
            visit_id: None,
            device,
            units: Vec::new(),
            assignment: WorkAssignment::default(),
            attempt: 0,
        }
    }

    pub fn with_visit(mut self, visit_id: Option<String>) -> Self {
        self.visit_id = visit_id;
        self
    }

    pub fn with_units(mut self, units: Vec<String>) -> Self {
        self.units = units;
        self
    }

    pub fn with_assignment(mut self, assignment: WorkAssignment) -> Self {
        self.assignment = assignment;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("no session has been started")]
    NoSession,

    #[error("corrupt job record {job_num}: {message}")]
    Corrupt { job_num: String, message: String },

    #[error("job store error: {0}")]
    Store(#[from] ScoreboardError),

    #[error("job ledger lock poisoned")]
    Poisoned,
}
