//! Types for the archive orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ack::AckError;
use crate::backlog::BacklogError;
use crate::bus::{BusError, ProtocolError};
use crate::device::{DeviceError, DeviceRole};
use crate::forwarder::ForwarderError;
use crate::job::{Job, JobError, JobState, SessionError};
use crate::partition::PartitionError;

/// Errors that can occur during orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed or unknown inbound message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Publishing or subscribing failed after retries.
    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    #[error("ack registry error: {0}")]
    Ack(#[from] AckError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("job ledger error: {0}")]
    Job(#[from] JobError),

    #[error("backlog error: {0}")]
    Backlog(#[from] BacklogError),

    #[error("forwarder roster error: {0}")]
    Forwarder(#[from] ForwarderError),

    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("session file error: {0}")]
    Session(#[from] SessionError),
}

/// Where an image is in the integration and readout workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    /// START_INTEGRATION received, jobs not yet dispatched.
    NewVisit,
    IntegrationDispatched,
    ReadoutDispatched,
    ResultsCollected,
    Complete,
    /// At least one job was refused or failed.
    PartialFailure,
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub session_id: Option<String>,
    pub visit_id: Option<String>,
    /// Ack requests registered and not yet collected.
    pub open_acks: usize,
    /// Jobs of the current session by state.
    pub job_counts: BTreeMap<JobState, usize>,
    pub backlog_depth: usize,
    /// Workflow position of each image seen in the current visit.
    pub images: BTreeMap<String, WorkflowState>,
}

/// What one backlog retry did.
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    /// The entry was handed to a new job, shown in its final state.
    Retried { entry_id: u64, job: Job },
    /// The entry had exhausted its retries and was removed.
    Dropped {
        entry_id: u64,
        device: DeviceRole,
        retry_count: u32,
    },
}
