//! Request handlers.
//!
//! Handlers delegate to the [`MediaJobService`](artifex_worker::MediaJobService)
//! held in [`AppState`](crate::state::AppState) and map errors via
//! [`AppError`](crate::error::AppError).

pub mod jobs;
