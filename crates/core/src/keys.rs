//! Deterministic target-key derivation.
//!
//! A [`TargetKey`] names one derived artifact. Two requests that would
//! produce the same bytes must derive the same key, which is what makes
//! deduplication in the registry possible.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hashing::sha256_hex_parts;
use crate::job::JobKind;

/// Maximum accepted length of a caller-supplied key.
pub const MAX_KEY_LEN: usize = 1024;

/// Deterministic identifier of the desired derived artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    /// Wrap a caller-supplied key after validating it.
    ///
    /// Keys must be non-empty, at most [`MAX_KEY_LEN`] bytes and free of
    /// control characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(CoreError::Validation("Target key must not be empty".into()));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(CoreError::Validation(format!(
                "Target key exceeds {MAX_KEY_LEN} bytes"
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(CoreError::Validation(
                "Target key must not contain control characters".into(),
            ));
        }
        Ok(Self(raw))
    }

    /// Key for a thumbnail of `source` bounded by `width` x `height`.
    pub fn thumbnail(source: &Path, width: u32, height: u32) -> Self {
        Self(format!(
            "{}:{}@{width}x{height}",
            JobKind::Thumbnail.as_str(),
            normalize_path(source).display()
        ))
    }

    /// Key for an album banner built from `sources`.
    ///
    /// The source order matters (it is the banner's left-to-right order), so
    /// the fingerprint is taken over the list as given.
    pub fn banner(album_id: &str, sources: &[PathBuf], width: u32, height: u32) -> Self {
        let fingerprint = sha256_hex_parts(
            sources
                .iter()
                .map(|p| normalize_path(p).to_string_lossy().into_owned()),
        );
        Self(format!(
            "{}:{album_id}@{width}x{height}:{}",
            JobKind::Banner.as_str(),
            &fingerprint[..16]
        ))
    }

    /// Key for an album archive over `entries`.
    ///
    /// Entry order does not change the archive contents we care about, so the
    /// fingerprint is taken over the sorted, normalized list.
    pub fn archive(album_id: &str, entries: &[PathBuf]) -> Self {
        let mut normalized: Vec<String> = entries
            .iter()
            .map(|p| normalize_path(p).to_string_lossy().into_owned())
            .collect();
        normalized.sort();
        normalized.dedup();
        let fingerprint = sha256_hex_parts(&normalized);
        Self(format!(
            "{}:{album_id}:{}",
            JobKind::Archive.as_str(),
            &fingerprint[..16]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lexically normalize a path: drop `.` components and resolve `..` against
/// preceding normal components. Does not touch the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if popped {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
