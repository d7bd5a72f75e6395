//! Handlers for the `/jobs` resource.
//!
//! Jobs are addressed by target key, not by job id: every submission for
//! the same key joins the same job, so the key is what collaborators poll.

use std::time::Duration;

use artifex_core::error::{CoreError, JobError};
use artifex_core::job::{JobParams, JobRequest, JobStatusView};
use artifex_core::keys::TargetKey;
use artifex_worker::{SubmissionResult, WaitOutcome};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Wait used when the caller does not pass `timeout_ms`.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on a single long-poll.
pub const MAX_WAIT_TIMEOUT_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub params: JobParams,
    /// Caller-chosen target key. Derived from `params` when omitted.
    #[serde(default)]
    pub key: Option<String>,
    /// Re-render even if a result already exists.
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    pub key: String,
    pub timeout_ms: Option<u64>,
}

fn parse_key(raw: &str) -> AppResult<TargetKey> {
    Ok(TargetKey::parse(raw)?)
}

fn not_found(key: &TargetKey) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Job",
        key: key.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Returns 202 when a job was queued or joined, 200 when the artifact
/// already exists, 409 when the key belongs to a job of another kind, and
/// 503 with `Retry-After` when the queue is full or the service is shutting
/// down.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let params = input
        .params
        .clamp_thumbnail(state.config.jobs.thumbnail_max_edge);
    let request = match input.key {
        Some(raw) => JobRequest::with_key(parse_key(&raw)?, params)?,
        None => JobRequest::new(params)?,
    };

    let result = if input.regenerate {
        state.jobs.regenerate(request)
    } else {
        state.jobs.submit(request)
    };

    let status = match &result {
        SubmissionResult::Accepted { .. } | SubmissionResult::AlreadyInProgress { .. } => {
            StatusCode::ACCEPTED
        }
        SubmissionResult::Completed { .. } => StatusCode::OK,
        SubmissionResult::KindConflict { existing } => {
            return Err(CoreError::Conflict(format!(
                "Target key is already used by a {existing} job"
            ))
            .into())
        }
        SubmissionResult::QueueFull { capacity } => {
            return Err(JobError::QueueFull {
                capacity: *capacity,
            }
            .into())
        }
        SubmissionResult::ShuttingDown => return Err(JobError::ShuttingDown.into()),
    };

    Ok((status, Json(DataResponse { data: result })))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/status?key=
pub async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<KeyQuery>,
) -> AppResult<Json<DataResponse<JobStatusView>>> {
    let key = parse_key(&query.key)?;
    match state.jobs.get_status(&key) {
        JobStatusView::NotFound => Err(not_found(&key)),
        view => Ok(Json(DataResponse { data: view })),
    }
}

// ---------------------------------------------------------------------------
// Wait
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/wait?key=&timeout_ms=
///
/// Long-poll until the job finishes. A timeout (408) only releases this
/// caller; the job keeps running.
pub async fn wait_for_job(
    State(state): State<AppState>,
    Query(query): Query<WaitQuery>,
) -> AppResult<Json<DataResponse<JobStatusView>>> {
    let key = parse_key(&query.key)?;
    let timeout_ms = query
        .timeout_ms
        .unwrap_or(DEFAULT_WAIT_TIMEOUT_MS)
        .min(MAX_WAIT_TIMEOUT_MS);

    match state.jobs.wait(&key, Duration::from_millis(timeout_ms)).await {
        WaitOutcome::Completed(path) => Ok(Json(DataResponse {
            data: JobStatusView::Completed { path },
        })),
        WaitOutcome::Failed(error) => Err(AppError::Job(error)),
        WaitOutcome::TimedOut => Err(AppError::Timeout(format!(
            "Job {key} did not finish within {timeout_ms} ms"
        ))),
        WaitOutcome::NotFound => Err(not_found(&key)),
    }
}
