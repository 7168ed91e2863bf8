use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{audit, handlers, jobs, middleware::metrics_middleware, orchestrator, queues};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(orchestrator::get_status))
        // Devices and forwarders
        .route("/devices", get(orchestrator::list_devices))
        .route("/devices/{role}", get(orchestrator::get_device))
        .route("/forwarders", get(orchestrator::list_forwarders))
        // Jobs and backlog
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{job_num}", get(jobs::get_job))
        .route("/backlog", get(jobs::list_backlog))
        .route("/backlog/stats", get(jobs::backlog_stats))
        .route("/backlog/retry", post(jobs::retry_backlog))
        // Bus
        .route("/queues/{queue}", post(queues::publish))
        // Audit
        .route("/audit", get(audit::query_audit))
        .with_state(Arc::clone(&state));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
