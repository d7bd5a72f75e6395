/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a single job attempt.
pub type JobId = uuid::Uuid;
