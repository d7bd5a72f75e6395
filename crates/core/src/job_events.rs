//! Push-channel message constants for job lifecycle events.
//!
//! Used by the worker pool when publishing to the event hub and by clients
//! that filter the push stream.

/// Event category for every job lifecycle transition.
pub const EVENT_TYPE_JOB: &str = "job";

/// Extra-field key carrying the attempt id.
pub const EXTRA_JOB_ID: &str = "job_id";

/// Extra-field key carrying the stored artifact path on completion.
pub const EXTRA_RESULT_PATH: &str = "result_path";

/// Extra-field key carrying the failure category on failure.
pub const EXTRA_FAILURE: &str = "failure";
