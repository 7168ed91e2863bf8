//! Archive coordinator.
//!
//! The orchestrator consumes OCS commands and forwarder acks and drives each image
//! through its workflow:
//! - **Integration**: one job per enabled device, dispatched concurrently
//! - **Readout**: per-job result collection, optional archive confirmation
//! - **Backlog**: failed units retried as fresh jobs until their retries run out

mod config;
mod runner;
mod types;
mod workflow;

pub use config::{BacklogPolicyKind, OrchestratorConfig};
pub use runner::{Orchestrator, COMPONENT_NAME};
pub use types::{OrchestratorError, OrchestratorStatus, RetryOutcome, WorkflowState};
pub use workflow::collect_results;
