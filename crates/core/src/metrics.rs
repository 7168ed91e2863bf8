//! Prometheus metrics for core components.
//!
//! Collectors are process-wide statics. The server registers them through
//! [`all_metrics`] and serves them on `/metrics`.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Devices
// =============================================================================

/// Device commands by outcome.
pub static DEVICE_COMMANDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dmcs_device_commands_total", "Device commands received"),
        &["device", "command", "result"], // result: "accepted", "rejected"
    )
    .unwrap()
});

// =============================================================================
// Acks
// =============================================================================

pub static OPEN_ACK_REQUESTS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "dmcs_open_ack_requests",
        "Ack requests registered and not yet collected",
    )
    .unwrap()
});

/// Time from registration to collection.
pub static ACK_WAIT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "dmcs_ack_wait_seconds",
            "Time spent waiting for an ack request to resolve",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 1.5, 2.0, 3.0, 4.0, 6.0]),
    )
    .unwrap()
});

pub static ACK_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dmcs_ack_requests_total", "Ack requests collected"),
        &["outcome"], // "complete", "partial"
    )
    .unwrap()
});

// =============================================================================
// Jobs and backlog
// =============================================================================

pub static JOBS_CREATED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dmcs_jobs_created_total", "Jobs created"),
        &["device"],
    )
    .unwrap()
});

/// Job state changes by target state.
pub static JOB_STATES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dmcs_job_state_changes_total", "Job state changes"),
        &["state"],
    )
    .unwrap()
});

pub static BACKLOG_ENTRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dmcs_backlog_entries_total", "Backlog entry lifecycle events"),
        &["device", "action"], // "added", "resolved", "dropped"
    )
    .unwrap()
});

pub static BACKLOG_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("dmcs_backlog_depth", "Backlog entries awaiting retry").unwrap()
});

// =============================================================================
// Transport and forwarders
// =============================================================================

pub static PUBLISH_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "dmcs_publish_retries_total",
        "Publishes retried after a transient bus error",
    )
    .unwrap()
});

pub static HEALTHY_FORWARDERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "dmcs_healthy_forwarders",
        "Forwarders that answered the last health check",
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(DEVICE_COMMANDS.clone()),
        Box::new(OPEN_ACK_REQUESTS.clone()),
        Box::new(ACK_WAIT_SECONDS.clone()),
        Box::new(ACK_REQUESTS.clone()),
        Box::new(JOBS_CREATED.clone()),
        Box::new(JOB_STATES.clone()),
        Box::new(BACKLOG_ENTRIES.clone()),
        Box::new(BACKLOG_DEPTH.clone()),
        Box::new(PUBLISH_RETRIES.clone()),
        Box::new(HEALTHY_FORWARDERS.clone()),
    ]
}
