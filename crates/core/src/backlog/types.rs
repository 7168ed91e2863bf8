use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceRole;
use crate::scoreboard::ScoreboardError;

/// Per-CCD transfer outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    NoFile,
    BadChecksum,
    /// The forwarder responsible for the unit never answered.
    Unacknowledged,
    /// Any other code reported on the wire; counted as success.
    Other(String),
}

impl ResultCode {
    /// Classify a wire result code. Only missing files and checksum mismatches fail.
    pub fn classify(code: &str) -> Self {
        let normalized = code.trim().to_ascii_lowercase().replace('_', " ");
        match normalized.as_str() {
            "" | "ok" | "0" => ResultCode::Ok,
            "no file" => ResultCode::NoFile,
            "bad checksum" => ResultCode::BadChecksum,
            _ => ResultCode::Other(code.trim().to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ResultCode::NoFile | ResultCode::BadChecksum | ResultCode::Unacknowledged
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Ok => f.write_str("OK"),
            ResultCode::NoFile => f.write_str("NO_FILE"),
            ResultCode::BadChecksum => f.write_str("BAD_CHECKSUM"),
            ResultCode::Unacknowledged => f.write_str("UNACKNOWLEDGED"),
            ResultCode::Other(code) => f.write_str(code),
        }
    }
}

/// Why an entry was put on the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogReason {
    /// No forwarder was available or the transfer parameters were refused.
    Refused,
    /// Readout finished with failed units.
    TransferFailed,
}

impl fmt::Display for BacklogReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacklogReason::Refused => f.write_str("refused"),
            BacklogReason::TransferFailed => f.write_str("transfer_failed"),
        }
    }
}

/// Job context carried on an entry so a retry can be dispatched later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogContext {
    pub device: DeviceRole,
    pub session_id: String,
    pub image_id: String,
    pub visit_id: Option<String>,
    pub priority: i32,
    /// Retry attempt of the originating job (0 for a first dispatch).
    pub attempt: u32,
    pub reason: BacklogReason,
}

/// Failed CCD units awaiting retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub id: u64,
    pub orig_job_num: String,
    pub units: Vec<String>,
    pub device: DeviceRole,
    pub session_id: String,
    pub image_id: String,
    pub visit_id: Option<String>,
    pub priority: i32,
    pub reason: BacklogReason,
    pub added_at: DateTime<Utc>,
    /// How many times these units have already been retried.
    pub retry_count: u32,
}

/// Summary of the backlog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BacklogStats {
    pub entries: usize,
    pub units: usize,
    pub oldest: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum BacklogError {
    #[error("backlog store error: {0}")]
    Store(#[from] ScoreboardError),

    #[error("corrupt backlog entry {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("backlog entry {0} not found")]
    NotFound(u64),

    #[error("backlog lock poisoned")]
    Poisoned,
}
