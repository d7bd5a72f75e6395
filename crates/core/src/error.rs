use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with key {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a job could not be admitted or did not complete.
///
/// There is no `AlreadyInProgress` variant: joining an active job is a
/// normal submission outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum JobError {
    /// The work queue is saturated; the caller should retry later.
    #[error("Job queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The job system has stopped admitting work.
    #[error("Job system is shutting down")]
    ShuttingDown,

    /// The rendering capability returned an error (or panicked).
    #[error("Render failed: {0}")]
    RenderFailure(String),

    /// The artifact was rendered but could not be stored.
    #[error("Failed to store artifact: {0}")]
    Storage(String),

    /// The job was still queued or running when graceful shutdown expired.
    #[error("Job abandoned during shutdown")]
    ShutdownAbandoned,
}

impl JobError {
    /// Short machine-readable category, used in event payloads and HTTP
    /// error codes.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::QueueFull { .. } => "QUEUE_FULL",
            JobError::ShuttingDown => "SHUTTING_DOWN",
            JobError::RenderFailure(_) => "RENDER_FAILURE",
            JobError::Storage(_) => "STORAGE_ERROR",
            JobError::ShutdownAbandoned => "SHUTDOWN_ABANDONED",
        }
    }

    /// Whether the caller should simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::QueueFull { .. } | JobError::ShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_errors_are_retryable() {
        assert!(JobError::QueueFull { capacity: 2 }.is_retryable());
        assert!(JobError::ShuttingDown.is_retryable());
        assert!(!JobError::RenderFailure("corrupt".into()).is_retryable());
        assert!(!JobError::ShutdownAbandoned.is_retryable());
    }

    #[test]
    fn job_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(JobError::RenderFailure("bad header".into())).unwrap();
        assert_eq!(json["kind"], "render_failure");
        assert_eq!(json["message"], "bad header");
    }

    #[test]
    fn display_includes_capacity() {
        let err = JobError::QueueFull { capacity: 200 };
        assert_eq!(err.to_string(), "Job queue is full (capacity 200)");
        assert_eq!(err.code(), "QUEUE_FULL");
    }
}
