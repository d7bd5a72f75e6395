use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

/// Default number of concurrent worker executors.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Default capacity of the pending-job queue.
pub const DEFAULT_QUEUE_SIZE: usize = 200;

/// Default capacity of each subscriber's outbound buffer.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Default capacity of the event hub's inbound publish buffer.
pub const DEFAULT_PUBLISH_BUFFER: usize = 256;

/// Default retention of terminal job records.
pub const DEFAULT_COMPLETED_TTL_SECS: u64 = 300;

/// Default interval between registry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default grace period for draining workers on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Default longest edge for thumbnails requested without explicit bounds.
pub const DEFAULT_THUMBNAIL_MAX_EDGE: u32 = 1280;

/// Media-job subsystem configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct JobSystemConfig {
    /// Concurrent worker executors (default: `4`).
    pub num_workers: usize,
    /// Pending-job queue capacity (default: `200`).
    pub queue_size: usize,
    /// Per-subscriber outbound buffer (default: `256`).
    pub subscriber_buffer: usize,
    /// Event hub inbound publish buffer (default: `256`).
    pub publish_buffer: usize,
    /// How long Completed/Failed records stay visible (default: 300 s).
    pub completed_ttl: Duration,
    /// How often expired records are swept (default: 60 s).
    pub sweep_interval: Duration,
    /// How long running jobs may drain on shutdown (default: 30 s).
    pub shutdown_grace: Duration,
    /// Root directory of the artifact store (default: `./data/artifacts`).
    pub artifact_root: PathBuf,
    /// Default thumbnail bounding edge (default: `1280`).
    pub thumbnail_max_edge: u32,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            publish_buffer: DEFAULT_PUBLISH_BUFFER,
            completed_ttl: Duration::from_secs(DEFAULT_COMPLETED_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            artifact_root: PathBuf::from("./data/artifacts"),
            thumbnail_max_edge: DEFAULT_THUMBNAIL_MAX_EDGE,
        }
    }
}

impl JobSystemConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default             |
    /// |--------------------------------|---------------------|
    /// | `NUM_THUMBNAIL_WORKERS`        | `4`                 |
    /// | `THUMBNAIL_QUEUE_SIZE`         | `200`               |
    /// | `SUBSCRIBER_BUFFER_SIZE`       | `256`               |
    /// | `EVENT_PUBLISH_BUFFER_SIZE`    | `256`               |
    /// | `COMPLETED_JOB_TTL_SECS`       | `300`               |
    /// | `REGISTRY_SWEEP_INTERVAL_SECS` | `60`                |
    /// | `SHUTDOWN_GRACE_SECS`          | `30`                |
    /// | `ARTIFACT_ROOT`                | `./data/artifacts`  |
    /// | `THUMBNAIL_MAX_EDGE`           | `1280`              |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            num_workers: parse_or(&lookup, "NUM_THUMBNAIL_WORKERS", defaults.num_workers)?,
            queue_size: parse_or(&lookup, "THUMBNAIL_QUEUE_SIZE", defaults.queue_size)?,
            subscriber_buffer: parse_or(
                &lookup,
                "SUBSCRIBER_BUFFER_SIZE",
                defaults.subscriber_buffer,
            )?,
            publish_buffer: parse_or(
                &lookup,
                "EVENT_PUBLISH_BUFFER_SIZE",
                defaults.publish_buffer,
            )?,
            completed_ttl: Duration::from_secs(parse_or(
                &lookup,
                "COMPLETED_JOB_TTL_SECS",
                DEFAULT_COMPLETED_TTL_SECS,
            )?),
            sweep_interval: Duration::from_secs(parse_or(
                &lookup,
                "REGISTRY_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )?),
            shutdown_grace: Duration::from_secs(parse_or(
                &lookup,
                "SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
            artifact_root: lookup("ARTIFACT_ROOT")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.artifact_root),
            thumbnail_max_edge: parse_or(
                &lookup,
                "THUMBNAIL_MAX_EDGE",
                defaults.thumbnail_max_edge,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would deadlock or never admit work.
    pub fn validate(&self) -> Result<(), CoreError> {
        let nonzero = [
            ("NUM_THUMBNAIL_WORKERS", self.num_workers),
            ("THUMBNAIL_QUEUE_SIZE", self.queue_size),
            ("SUBSCRIBER_BUFFER_SIZE", self.subscriber_buffer),
            ("EVENT_PUBLISH_BUFFER_SIZE", self.publish_buffer),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(CoreError::Validation(format!("{name} must be at least 1")));
            }
        }
        if self.sweep_interval.is_zero() {
            return Err(CoreError::Validation(
                "REGISTRY_SWEEP_INTERVAL_SECS must be at least 1".into(),
            ));
        }
        if self.thumbnail_max_edge == 0 {
            return Err(CoreError::Validation(
                "THUMBNAIL_MAX_EDGE must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{name} must be a valid number, got '{raw}'"))),
        _ => Ok(default),
    }
}
