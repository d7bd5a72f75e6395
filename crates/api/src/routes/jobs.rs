//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /           -> submit_job
/// GET    /status     -> job_status
/// GET    /wait       -> wait_for_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::submit_job))
        .route("/status", get(jobs::job_status))
        .route("/wait", get(jobs::wait_for_job))
}
