use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Number of worker executors.
    pub workers: usize,
    /// Capacity of the pending-job queue.
    pub queue_capacity: usize,
    /// Jobs waiting for a worker.
    pub queue_depth: usize,
    /// Jobs Pending or Running.
    pub active_jobs: usize,
    /// Live push subscribers.
    pub subscribers: usize,
    /// Open WebSocket connections.
    pub ws_connections: usize,
}

/// GET /health -- returns service and job system health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.jobs.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        workers: state.jobs.num_workers(),
        queue_capacity: state.jobs.queue_capacity(),
        queue_depth: state.jobs.queue_depth(),
        active_jobs: state.jobs.active_jobs(),
        subscribers: state.hub.subscriber_count(),
        ws_connections: state.ws_connections.count(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
