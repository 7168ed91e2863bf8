//! Orchestrator, device and forwarder inspection handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use dmcs_core::{device::Device, DeviceRole, ForwarderRecord, OrchestratorStatus};

use super::handlers::{api_error, internal_error, ApiError};
use crate::state::AppState;

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().status())
}

pub async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<Device>> {
    Json(state.orchestrator().devices().devices())
}

pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<Device>, ApiError> {
    let role: DeviceRole = role
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;

    state
        .orchestrator()
        .devices()
        .device(role)
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Device {} is not configured", role),
            )
        })
}

pub async fn list_forwarders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ForwarderRecord>>, ApiError> {
    state
        .orchestrator()
        .forwarders()
        .all()
        .map(Json)
        .map_err(|e| internal_error("Failed to read forwarder roster", e))
}
