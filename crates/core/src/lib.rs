//! Shared domain types for the Artifex media-job subsystem.
//!
//! Everything here is free of async runtime concerns so that the event hub,
//! the renderer and the worker pool can all depend on it:
//!
//! - [`job`] : job kinds, statuses, parameters and records.
//! - [`keys`] : deterministic target-key derivation.
//! - [`storage`] : the [`ArtifactStore`](storage::ArtifactStore) contract and
//!   the local filesystem implementation.
//! - [`render`] : the [`Renderer`](render::Renderer) capability contract.
//! - [`config`] : environment-driven tuning knobs.

pub mod config;
pub mod error;
pub mod hashing;
pub mod job;
pub mod job_events;
pub mod keys;
pub mod render;
pub mod storage;
pub mod types;
