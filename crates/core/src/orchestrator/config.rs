//! Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backlog::{BacklogPolicy, FifoPolicy, PriorityPolicy};
use crate::bus::RetryPolicy;
use crate::partition::RemainderPolicy;

/// Which backlog entry a retry picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogPolicyKind {
    #[default]
    Fifo,
    Priority,
}

impl BacklogPolicyKind {
    pub fn policy(&self) -> Box<dyn BacklogPolicy> {
        match self {
            BacklogPolicyKind::Fifo => Box::new(FifoPolicy),
            BacklogPolicyKind::Priority => Box::new(PriorityPolicy),
        }
    }
}

/// Configuration for the archive coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Queue carrying OCS commands and workflow events.
    #[serde(default = "default_command_queue")]
    pub command_queue: String,

    /// Queue carrying forwarder and archive acks.
    #[serde(default = "default_ack_queue")]
    pub ack_queue: String,

    /// Where replies go when a message carries no `REPLY_QUEUE`.
    #[serde(default = "default_reply_queue")]
    pub reply_queue: String,

    /// Where device state notifications are published.
    #[serde(default = "default_notification_queue")]
    pub notification_queue: String,

    /// Deadline for forwarder health-check acks (milliseconds).
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout_ms: u64,

    /// Deadline for transfer-parameter acks (milliseconds).
    #[serde(default = "default_xfer_params_timeout")]
    pub xfer_params_timeout_ms: u64,

    /// Deadline for end-of-readout acks (milliseconds).
    #[serde(default = "default_readout_timeout")]
    pub readout_timeout_ms: u64,

    /// Total publish attempts before a transport error surfaces.
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,

    /// First publish retry delay (milliseconds); doubles per attempt.
    #[serde(default = "default_publish_backoff")]
    pub publish_backoff_ms: u64,

    /// Backlog entries retried this many times are dropped.
    #[serde(default = "default_max_backlog_retries")]
    pub max_backlog_retries: u32,

    #[serde(default)]
    pub backlog_policy: BacklogPolicyKind,

    /// Priority stamped on new backlog entries.
    #[serde(default)]
    pub backlog_priority: i32,

    /// How often to retry one backlog entry (milliseconds). 0 disables the loop.
    #[serde(default)]
    pub backlog_retry_interval_ms: u64,

    #[serde(default)]
    pub remainder_policy: RemainderPolicy,
}

fn default_command_queue() -> String {
    "dmcs_consume".to_string()
}

fn default_ack_queue() -> String {
    "dmcs_ack_consume".to_string()
}

fn default_reply_queue() -> String {
    "dmcs_ocs_publish".to_string()
}

fn default_notification_queue() -> String {
    "dmcs_ocs_notify".to_string()
}

fn default_health_check_timeout() -> u64 {
    1400
}

fn default_xfer_params_timeout() -> u64 {
    3000
}

fn default_readout_timeout() -> u64 {
    4000
}

fn default_publish_attempts() -> u32 {
    3
}

fn default_publish_backoff() -> u64 {
    100
}

fn default_max_backlog_retries() -> u32 {
    3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            command_queue: default_command_queue(),
            ack_queue: default_ack_queue(),
            reply_queue: default_reply_queue(),
            notification_queue: default_notification_queue(),
            health_check_timeout_ms: default_health_check_timeout(),
            xfer_params_timeout_ms: default_xfer_params_timeout(),
            readout_timeout_ms: default_readout_timeout(),
            publish_attempts: default_publish_attempts(),
            publish_backoff_ms: default_publish_backoff(),
            max_backlog_retries: default_max_backlog_retries(),
            backlog_policy: BacklogPolicyKind::default(),
            backlog_priority: 0,
            backlog_retry_interval_ms: 0,
            remainder_policy: RemainderPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn xfer_params_timeout(&self) -> Duration {
        Duration::from_millis(self.xfer_params_timeout_ms)
    }

    pub fn readout_timeout(&self) -> Duration {
        Duration::from_millis(self.readout_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.publish_attempts,
            initial_backoff: Duration::from_millis(self.publish_backoff_ms),
        }
    }
}
