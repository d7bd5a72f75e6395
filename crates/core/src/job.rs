//! Job kinds, statuses, parameters and records.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, JobError};
use crate::keys::TargetKey;
use crate::types::{JobId, Timestamp};

/// Maximum edge length accepted for any rendered image.
pub const MAX_RENDER_EDGE: u32 = 8192;

/// Maximum number of entries in a single archive job.
pub const MAX_ARCHIVE_ENTRIES: usize = 10_000;

/// Maximum number of source images in a banner.
pub const MAX_BANNER_SOURCES: usize = 16;

// ---------------------------------------------------------------------------
// Kind / status
// ---------------------------------------------------------------------------

/// The kind of derived artifact a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Thumbnail,
    Archive,
    Banner,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Thumbnail, JobKind::Archive, JobKind::Banner];

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Thumbnail => "thumbnail",
            JobKind::Archive => "archive",
            JobKind::Banner => "banner",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job. `Pending` is initial; `Completed` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Typed rendering parameters, one variant per [`JobKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    /// Scale `source` to fit inside `max_width` x `max_height`.
    Thumbnail {
        source: PathBuf,
        max_width: u32,
        max_height: u32,
    },
    /// Lay `sources` out left-to-right into a `width` x `height` strip.
    Banner {
        album_id: String,
        sources: Vec<PathBuf>,
        width: u32,
        height: u32,
    },
    /// Pack `entries` into a single archive for download.
    Archive {
        album_id: String,
        entries: Vec<PathBuf>,
    },
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Thumbnail { .. } => JobKind::Thumbnail,
            JobParams::Banner { .. } => JobKind::Banner,
            JobParams::Archive { .. } => JobKind::Archive,
        }
    }

    /// Cap thumbnail bounds at `max_edge`, the largest edge the renderer
    /// will produce, so requests that render identically share one key.
    /// Other kinds pass through unchanged.
    pub fn clamp_thumbnail(self, max_edge: u32) -> Self {
        match self {
            JobParams::Thumbnail {
                source,
                max_width,
                max_height,
            } => JobParams::Thumbnail {
                source,
                max_width: max_width.min(max_edge),
                max_height: max_height.min(max_edge),
            },
            other => other,
        }
    }

    /// Derive the canonical target key for these parameters.
    pub fn target_key(&self) -> TargetKey {
        match self {
            JobParams::Thumbnail {
                source,
                max_width,
                max_height,
            } => TargetKey::thumbnail(source, *max_width, *max_height),
            JobParams::Banner {
                album_id,
                sources,
                width,
                height,
            } => TargetKey::banner(album_id, sources, *width, *height),
            JobParams::Archive { album_id, entries } => TargetKey::archive(album_id, entries),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            JobParams::Thumbnail {
                source,
                max_width,
                max_height,
            } => {
                require_path(source, "source")?;
                require_dimensions(*max_width, *max_height)
            }
            JobParams::Banner {
                album_id,
                sources,
                width,
                height,
            } => {
                require_album_id(album_id)?;
                if sources.is_empty() {
                    return Err(CoreError::Validation(
                        "Banner requires at least one source".into(),
                    ));
                }
                if sources.len() > MAX_BANNER_SOURCES {
                    return Err(CoreError::Validation(format!(
                        "Banner accepts at most {MAX_BANNER_SOURCES} sources"
                    )));
                }
                for source in sources {
                    require_path(source, "sources")?;
                }
                require_dimensions(*width, *height)
            }
            JobParams::Archive { album_id, entries } => {
                require_album_id(album_id)?;
                if entries.is_empty() {
                    return Err(CoreError::Validation(
                        "Archive requires at least one entry".into(),
                    ));
                }
                if entries.len() > MAX_ARCHIVE_ENTRIES {
                    return Err(CoreError::Validation(format!(
                        "Archive accepts at most {MAX_ARCHIVE_ENTRIES} entries"
                    )));
                }
                for entry in entries {
                    require_path(entry, "entries")?;
                }
                Ok(())
            }
        }
    }
}

fn require_path(path: &std::path::Path, field: &str) -> Result<(), CoreError> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::Validation(format!("{field} contains an empty path")));
    }
    Ok(())
}

fn require_album_id(album_id: &str) -> Result<(), CoreError> {
    if album_id.trim().is_empty() {
        return Err(CoreError::Validation("album_id must not be empty".into()));
    }
    if album_id.contains(':') {
        return Err(CoreError::Validation("album_id must not contain ':'".into()));
    }
    Ok(())
}

fn require_dimensions(width: u32, height: u32) -> Result<(), CoreError> {
    if width == 0 || height == 0 {
        return Err(CoreError::Validation(
            "Dimensions must be greater than zero".into(),
        ));
    }
    if width > MAX_RENDER_EDGE || height > MAX_RENDER_EDGE {
        return Err(CoreError::Validation(format!(
            "Dimensions must not exceed {MAX_RENDER_EDGE}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A validated request for one derived artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: JobKind,
    pub key: TargetKey,
    pub params: JobParams,
}

impl JobRequest {
    /// Build a request whose key is derived from `params`.
    pub fn new(params: JobParams) -> Result<Self, CoreError> {
        params.validate()?;
        Ok(Self {
            kind: params.kind(),
            key: params.target_key(),
            params,
        })
    }

    /// Build a request under a caller-chosen key.
    pub fn with_key(key: TargetKey, params: JobParams) -> Result<Self, CoreError> {
        params.validate()?;
        Ok(Self {
            kind: params.kind(),
            key,
            params,
        })
    }
}

// ---------------------------------------------------------------------------
// Record / status view
// ---------------------------------------------------------------------------

/// Snapshot of one job attempt as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub target_key: TargetKey,
    pub status: JobStatus,
    /// Set only when `status == Completed`.
    pub result_path: Option<PathBuf>,
    /// Set only when `status == Failed`.
    pub error: Option<JobError>,
    pub queued_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl JobRecord {
    /// A fresh Pending record.
    pub fn pending(kind: JobKind, target_key: TargetKey) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            target_key,
            status: JobStatus::Pending,
            result_path: None,
            error: None,
            queued_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// What a polling collaborator learns about a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatusView {
    NotFound,
    Pending,
    Running,
    Completed { path: PathBuf },
    Failed { reason: String },
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        match record.status {
            JobStatus::Pending => JobStatusView::Pending,
            JobStatus::Running => JobStatusView::Running,
            JobStatus::Completed => match &record.result_path {
                Some(path) => JobStatusView::Completed { path: path.clone() },
                None => JobStatusView::Failed {
                    reason: "completed without a result path".into(),
                },
            },
            JobStatus::Failed => JobStatusView::Failed {
                reason: record
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown error".into()),
            },
        }
    }
}
