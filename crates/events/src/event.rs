//! The lifecycle event envelope.

use artifex_core::job::{JobKind, JobRecord, JobStatus};
use artifex_core::job_events::{
    EVENT_TYPE_JOB, EXTRA_FAILURE, EXTRA_JOB_ID, EXTRA_RESULT_PATH,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A notification pushed to live subscribers.
///
/// Events are fire-and-forget: they are serialized once by the hub and
/// carry no handle back to the job they describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event category, e.g. `"job"`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// The target key the event is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// The job kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<JobKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Free-form additional fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Map<String, Value>>,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Event {
    /// Create an event with only the required fields.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            path: None,
            task: None,
            status: None,
            error: None,
            extra: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Describe the current state of a job record.
    pub fn from_job(record: &JobRecord) -> Self {
        let mut event = Self::new(EVENT_TYPE_JOB)
            .with_path(record.target_key.as_str())
            .with_task(record.kind)
            .with_status(record.status)
            .with_extra(EXTRA_JOB_ID, Value::String(record.id.to_string()));

        if let Some(path) = &record.result_path {
            event = event.with_extra(
                EXTRA_RESULT_PATH,
                Value::String(path.to_string_lossy().into_owned()),
            );
        }
        if let Some(err) = &record.error {
            event = event
                .with_error(err.to_string())
                .with_extra(EXTRA_FAILURE, Value::String(err.code().to_string()));
        }
        event
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_task(mut self, task: JobKind) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Add one key to the `extra` mapping.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use artifex_core::error::JobError;
    use artifex_core::keys::TargetKey;

    use super::*;

    fn record(status: JobStatus) -> JobRecord {
        let mut record = JobRecord::pending(
            JobKind::Thumbnail,
            TargetKey::parse("thumbnail:/a.jpg@64x64").unwrap(),
        );
        record.status = status;
        record
    }

    #[test]
    fn bare_event_serializes_only_required_fields() {
        let json = serde_json::to_value(Event::new("job")).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(json["type"], "job");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn completed_job_event_carries_result_path() {
        let mut rec = record(JobStatus::Completed);
        rec.result_path = Some("/data/thumbnails/ab/ab.jpg".into());

        let json = serde_json::to_value(Event::from_job(&rec)).unwrap();
        assert_eq!(json["type"], "job");
        assert_eq!(json["task"], "thumbnail");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["path"], "thumbnail:/a.jpg@64x64");
        assert_eq!(json["extra"]["result_path"], "/data/thumbnails/ab/ab.jpg");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_job_event_carries_error_and_category() {
        let mut rec = record(JobStatus::Failed);
        rec.error = Some(JobError::RenderFailure("unsupported format".into()));

        let event = Event::from_job(&rec);
        assert_eq!(
            event.error.as_deref(),
            Some("Render failed: unsupported format")
        );
        assert_eq!(
            event.extra.as_ref().unwrap()[EXTRA_FAILURE],
            "RENDER_FAILURE"
        );
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::new("job")
            .with_status(JobStatus::Running)
            .with_extra("attempt", Value::from(2));
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
