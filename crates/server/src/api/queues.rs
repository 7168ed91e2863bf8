//! Publishing envelopes onto the in-process bus.
//!
//! This is how an operator (or a test) plays the part of OCS: a JSON object posted to
//! `/queues/dmcs_consume` lands on the command queue exactly as a bus message would.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use dmcs_core::{BusError, Envelope};

use super::handlers::{api_error, internal_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub queue: String,
    pub msg_type: String,
}

pub async fn publish(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let msg_type = envelope
        .msg_type()
        .map(str::to_string)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Envelope has no MSG_TYPE"))?;

    match state.bus().publish(&queue, envelope).await {
        Ok(()) => {
            tracing::debug!(queue = %queue, msg_type = %msg_type, "Published envelope via API");
            Ok((
                StatusCode::ACCEPTED,
                Json(PublishResponse { queue, msg_type }),
            ))
        }
        Err(e @ (BusError::QueueFull(_) | BusError::Closed(_))) => {
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
        Err(e) => Err(internal_error("Failed to publish", e)),
    }
}
