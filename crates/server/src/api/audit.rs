use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use dmcs_core::{AuditFilter, AuditRecord};

use super::handlers::{internal_error, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for audit queries
const MAX_LIMIT: i64 = 1000;

const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for the audit endpoint
#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub job_num: Option<String>,
    /// Exposure id; matches the events of every job for that image
    pub image_id: Option<String>,
    pub event_type: Option<String>,
    /// Device role, e.g. `AR`
    pub device: Option<String>,
    /// Events at or after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Events at or before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Total number of matching events, ignoring limit and offset
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query audit events, newest first.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut base_filter = AuditFilter::new();
    if let Some(ref job_num) = params.job_num {
        base_filter = base_filter.with_job_num(job_num);
    }
    if let Some(ref image_id) = params.image_id {
        base_filter = base_filter.with_image_id(image_id);
    }
    if let Some(ref event_type) = params.event_type {
        base_filter = base_filter.with_event_type(event_type);
    }
    if let Some(ref device) = params.device {
        base_filter = base_filter.with_device(device);
    }
    if params.from.is_some() || params.to.is_some() {
        base_filter = base_filter.with_time_range(params.from, params.to);
    }

    let query_filter = base_filter.clone().with_limit(limit).with_offset(offset);

    let events = state
        .audit_store()
        .query(&query_filter)
        .map_err(|e| internal_error("Failed to query audit events", e))?;
    let total = state
        .audit_store()
        .count(&base_filter)
        .map_err(|e| internal_error("Failed to count audit events", e))?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}
