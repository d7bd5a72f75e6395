//! Artifex media-job execution.
//!
//! - [`registry`]: per-key job state, deduplication and joining.
//! - [`queue`]: the bounded admission buffer.
//! - [`pool`]: fixed set of worker tasks draining the queue.
//! - [`service`]: the facade request handlers talk to.

pub mod pool;
pub mod queue;
pub mod registry;
pub mod service;

pub use registry::{BeginOutcome, JobOutcome, JobRegistry};
pub use service::{MediaJobService, SubmissionResult, WaitOutcome};
