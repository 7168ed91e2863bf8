use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::{keys, Envelope};
use crate::scoreboard::ScoreboardError;

/// Identifier of a timed ack request: `<ACK_TYPE>_<6-digit sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckId(String);

impl AckId {
    pub fn new(ack_type: &str, sequence: u64) -> Self {
        Self(format!("{}_{:06}", ack_type, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AckId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AckId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Error)]
pub enum AckError {
    #[error("ack id {0} is already registered")]
    AlreadyRegistered(AckId),

    #[error("ack id {0} is not registered")]
    Unknown(AckId),

    #[error("ack counter: {0}")]
    Store(#[from] ScoreboardError),

    #[error("ack registry lock poisoned")]
    Poisoned,
}

/// Result of feeding one response into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored; more responses are still expected.
    Accepted,
    /// Stored, and it was the last expected response.
    Completed,
    /// This participant already answered; ignored.
    Duplicate,
    /// The request already reached its expected count; ignored.
    Resolved,
    /// No open request with this id (never issued, or already collected).
    Unknown,
}

/// What a waiter gets back once a request completes or its deadline passes.
#[derive(Debug, Clone, PartialEq)]
pub struct AckOutcome {
    pub ack_id: AckId,
    pub expected: usize,
    pub responses: BTreeMap<String, Envelope>,
    pub complete: bool,
}

impl AckOutcome {
    /// Participants whose response carried a true `ACK_BOOL`.
    pub fn positive(&self) -> Vec<String> {
        self.responses
            .iter()
            .filter(|(_, env)| env.get_bool(keys::ACK_BOOL).unwrap_or(false))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Participants that answered with a false (or missing) `ACK_BOOL`.
    pub fn negative(&self) -> Vec<String> {
        self.responses
            .iter()
            .filter(|(_, env)| !env.get_bool(keys::ACK_BOOL).unwrap_or(false))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Expected participants with no response.
    pub fn missing<'a>(&self, expected: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        expected
            .into_iter()
            .filter(|p| !self.responses.contains_key(*p))
            .map(str::to_string)
            .collect()
    }

    /// Complete and every response positive.
    pub fn all_positive(&self) -> bool {
        self.complete && self.negative().is_empty()
    }
}
