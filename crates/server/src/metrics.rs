//! Prometheus metrics for the HTTP surface.
//!
//! Request metrics are recorded by middleware. Coordinator gauges are refreshed from
//! the orchestrator right before each scrape, and the core collectors are registered
//! alongside so `/metrics` exposes everything from one registry.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use regex_lite::Regex;

use dmcs_core::job::JobState;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "dmcs_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dmcs_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "dmcs_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Coordinator gauges (collected dynamically)
// =============================================================================

/// 1 while the command and ack listeners are running.
pub static ORCHESTRATOR_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "dmcs_orchestrator_running",
        "Whether the orchestrator is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Jobs of the current session by state.
pub static JOBS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("dmcs_jobs_by_state", "Current session job count by state"),
        &["state"],
    )
    .unwrap()
});

pub static ENABLED_DEVICES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("dmcs_enabled_devices", "Devices in the ENABLE state").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        Box::new(ORCHESTRATOR_RUNNING.clone()),
        Box::new(JOBS_BY_STATE.clone()),
        Box::new(ENABLED_DEVICES.clone()),
    ];

    for collector in collectors
        .into_iter()
        .chain(dmcs_core::metrics::all_metrics())
    {
        if let Err(e) = registry.register(collector) {
            tracing::warn!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Refresh gauges from the orchestrator before a scrape.
pub fn collect_dynamic_metrics(state: &AppState) {
    let orchestrator = state.orchestrator();
    let status = orchestrator.status();

    ORCHESTRATOR_RUNNING.set(if status.running { 1 } else { 0 });
    dmcs_core::metrics::BACKLOG_DEPTH.set(status.backlog_depth as i64);
    dmcs_core::metrics::OPEN_ACK_REQUESTS.set(status.open_acks as i64);
    ENABLED_DEVICES.set(orchestrator.devices().enabled_devices().len() as i64);

    for job_state in [
        JobState::Dispatched,
        JobState::TakeImages,
        JobState::Readout,
        JobState::Complete,
        JobState::Failed,
        JobState::Refused,
    ] {
        let count = status.job_counts.get(&job_state).copied().unwrap_or(0);
        JOBS_BY_STATE
            .with_label_values(&[job_state.as_str()])
            .set(count as i64);
    }

    if let Ok(healthy) = orchestrator.forwarders().healthy() {
        dmcs_core::metrics::HEALTHY_FORWARDERS.set(healthy.len() as i64);
    }
}

static JOB_NUM_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[^/]+_\d+(/|$)").unwrap());
static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace ids with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = JOB_NUM_SEGMENT.replace_all(path, "/{job_num}$1");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_job_num() {
        assert_eq!(normalize_path("/api/v1/jobs/7_12"), "/api/v1/jobs/{job_num}");
    }

    #[test]
    fn test_normalize_path_numeric() {
        assert_eq!(normalize_path("/api/v1/backlog/42"), "/api/v1/backlog/{id}");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/health"), "/api/v1/health");
        assert_eq!(normalize_path("/api/v1/devices/AR"), "/api/v1/devices/AR");
    }

    #[test]
    fn test_normalize_path_keeps_queue_names() {
        assert_eq!(
            normalize_path("/api/v1/queues/dmcs_consume"),
            "/api/v1/queues/dmcs_consume"
        );
    }

    #[test]
    fn test_encode_metrics_includes_core_collectors() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        dmcs_core::metrics::JOBS_CREATED.with_label_values(&["AR"]).inc();

        let output = encode_metrics();
        assert!(output.contains("dmcs_http_requests_total"));
        assert!(output.contains("dmcs_jobs_created_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }
}
