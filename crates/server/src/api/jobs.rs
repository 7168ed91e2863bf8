//! Job and backlog inspection handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use dmcs_core::{
    backlog::{BacklogEntry, BacklogStats},
    DeviceRole, Job, RetryOutcome,
};

use super::handlers::{api_error, internal_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct JobQueryParams {
    /// Defaults to the current session.
    pub session: Option<String>,
    /// Restrict to one image.
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub session_id: Option<String>,
    pub jobs: Vec<Job>,
}

/// What `POST /backlog/retry` did.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetryResponse {
    Empty,
    Retried {
        entry_id: u64,
        job: Job,
    },
    Dropped {
        entry_id: u64,
        device: DeviceRole,
        retry_count: u32,
    },
}

impl From<Option<RetryOutcome>> for RetryResponse {
    fn from(outcome: Option<RetryOutcome>) -> Self {
        match outcome {
            None => RetryResponse::Empty,
            Some(RetryOutcome::Retried { entry_id, job }) => {
                RetryResponse::Retried { entry_id, job }
            }
            Some(RetryOutcome::Dropped {
                entry_id,
                device,
                retry_count,
            }) => RetryResponse::Dropped {
                entry_id,
                device,
                retry_count,
            },
        }
    }
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JobQueryParams>,
) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.orchestrator().jobs();

    let session_id = match params.session {
        Some(session) => Some(session),
        None => jobs
            .current_session()
            .map_err(|e| internal_error("Failed to read session", e))?,
    };

    let mut list = match session_id {
        Some(ref session) => jobs
            .jobs_for_session(session)
            .map_err(|e| internal_error("Failed to list jobs", e))?,
        None => Vec::new(),
    };
    if let Some(ref image) = params.image {
        list.retain(|job| &job.image_id == image);
    }

    Ok(Json(JobListResponse {
        session_id,
        jobs: list,
    }))
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_num): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.orchestrator().jobs().get(&job_num) {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Job not found: {}", job_num),
        )),
        Err(e) => Err(internal_error("Failed to read job", e)),
    }
}

pub async fn list_backlog(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BacklogEntry>>, ApiError> {
    state
        .orchestrator()
        .backlog()
        .entries()
        .map(Json)
        .map_err(|e| internal_error("Failed to read backlog", e))
}

pub async fn backlog_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BacklogStats>, ApiError> {
    state
        .orchestrator()
        .backlog()
        .stats()
        .map(Json)
        .map_err(|e| internal_error("Failed to read backlog stats", e))
}

/// Retry the next backlog entry now instead of waiting for the retry loop.
pub async fn retry_backlog(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RetryResponse>, ApiError> {
    state
        .orchestrator()
        .retry_backlog()
        .await
        .map(|outcome| Json(outcome.into()))
        .map_err(|e| internal_error("Backlog retry failed", e))
}
