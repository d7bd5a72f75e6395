//! Artifact storage.
//!
//! Generated files live under a managed root, one directory per
//! [`JobKind`], addressed by a digest of the target key:
//!
//! ```text
//! <root>/thumbnails/ab/ab12…ef.jpg
//! <root>/banners/…/….jpg
//! <root>/archives/…/….zip
//! ```
//!
//! The store takes no locks. Only the worker currently holding the active
//! job for a key ever writes that key's path, so exclusivity is inherited
//! from the registry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::hashing::sha256_hex;
use crate::job::JobKind;
use crate::keys::TargetKey;
use crate::render::RenderOutput;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Location-addressed storage for generated artifacts.
pub trait ArtifactStore: Send + Sync + 'static {
    /// The path where the artifact for `key` lives (whether or not it has
    /// been generated yet).
    fn put(&self, kind: JobKind, key: &TargetKey) -> PathBuf;

    /// Whether a finished artifact exists for `key`.
    fn exists(&self, kind: JobKind, key: &TargetKey) -> bool;

    /// Durably store render output for `key` and return its final path.
    ///
    /// The final path must either hold the complete artifact or not be
    /// touched at all; readers never observe a partial file.
    fn persist(
        &self,
        kind: JobKind,
        key: &TargetKey,
        output: RenderOutput,
    ) -> Result<PathBuf, StorageError>;
}

/// Filesystem-backed [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the per-kind directories under the root.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        for kind in JobKind::ALL {
            let dir = self.root.join(kind_dir(kind));
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        }
        Ok(())
    }

    fn write_atomically(&self, target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = temp_path(target);
        let result = (|| {
            let mut file = fs::File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
            file.write_all(bytes).map_err(|e| StorageError::io(&tmp, e))?;
            file.sync_all().map_err(|e| StorageError::io(&tmp, e))?;
            fs::rename(&tmp, target).map_err(|e| StorageError::io(target, e))
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    fn move_into_place(&self, source: &Path, target: &Path) -> Result<(), StorageError> {
        if fs::rename(source, target).is_ok() {
            return Ok(());
        }
        // Cross-device: copy to a sibling temp file, then rename.
        let tmp = temp_path(target);
        let result = (|| {
            fs::copy(source, &tmp).map_err(|e| StorageError::io(source, e))?;
            fs::File::open(&tmp)
                .and_then(|f| f.sync_all())
                .map_err(|e| StorageError::io(&tmp, e))?;
            fs::rename(&tmp, target).map_err(|e| StorageError::io(target, e))
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        } else {
            let _ = fs::remove_file(source);
        }
        result
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, kind: JobKind, key: &TargetKey) -> PathBuf {
        let digest = sha256_hex(key.as_str().as_bytes());
        self.root
            .join(kind_dir(kind))
            .join(&digest[..2])
            .join(format!("{digest}.{}", kind_extension(kind)))
    }

    fn exists(&self, kind: JobKind, key: &TargetKey) -> bool {
        self.put(kind, key).is_file()
    }

    fn persist(
        &self,
        kind: JobKind,
        key: &TargetKey,
        output: RenderOutput,
    ) -> Result<PathBuf, StorageError> {
        let target = self.put(kind, key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        match output {
            RenderOutput::Bytes(bytes) => self.write_atomically(&target, &bytes)?,
            RenderOutput::File(source) => self.move_into_place(&source, &target)?,
        }

        tracing::debug!(kind = %kind, key = %key, path = %target.display(), "Artifact stored");
        Ok(target)
    }
}

fn kind_dir(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Thumbnail => "thumbnails",
        JobKind::Archive => "archives",
        JobKind::Banner => "banners",
    }
}

fn kind_extension(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Thumbnail | JobKind::Banner => "jpg",
        JobKind::Archive => "zip",
    }
}

fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp-{}", uuid::Uuid::new_v4()));
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> TargetKey {
        TargetKey::parse(raw).unwrap()
    }

    #[test]
    fn put_is_deterministic_and_kind_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let k = key("thumbnail:/a.jpg@1x1");

        assert_eq!(store.put(JobKind::Thumbnail, &k), store.put(JobKind::Thumbnail, &k));
        assert_ne!(store.put(JobKind::Thumbnail, &k), store.put(JobKind::Archive, &k));
        assert!(store
            .put(JobKind::Archive, &k)
            .to_string_lossy()
            .ends_with(".zip"));
    }

    #[test]
    fn persist_bytes_makes_artifact_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let k = key("thumbnail:/a.jpg@1x1");

        assert!(!store.exists(JobKind::Thumbnail, &k));
        let path = store
            .persist(JobKind::Thumbnail, &k, RenderOutput::Bytes(b"jpeg".to_vec()))
            .unwrap();

        assert!(store.exists(JobKind::Thumbnail, &k));
        assert_eq!(fs::read(&path).unwrap(), b"jpeg");
    }

    #[test]
    fn persist_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let k = key("banner:a@1x1:abc");

        let path = store
            .persist(JobKind::Banner, &k, RenderOutput::Bytes(vec![1, 2, 3]))
            .unwrap();

        let siblings: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings.len(), 1);
    }

    #[test]
    fn persist_file_moves_renderer_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("store"));
        let rendered = dir.path().join("rendered.zip");
        fs::write(&rendered, b"PK").unwrap();
        let k = key("archive:a:0011");

        let path = store
            .persist(JobKind::Archive, &k, RenderOutput::File(rendered.clone()))
            .unwrap();

        assert!(!rendered.exists());
        assert_eq!(fs::read(path).unwrap(), b"PK");
    }

    #[test]
    fn persist_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let k = key("thumbnail:/a.jpg@1x1");

        store
            .persist(JobKind::Thumbnail, &k, RenderOutput::Bytes(b"old".to_vec()))
            .unwrap();
        let path = store
            .persist(JobKind::Thumbnail, &k, RenderOutput::Bytes(b"new".to_vec()))
            .unwrap();

        assert_eq!(fs::read(path).unwrap(), b"new");
    }

    #[test]
    fn ensure_layout_creates_kind_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.ensure_layout().unwrap();

        for sub in ["thumbnails", "archives", "banners"] {
            assert!(dir.path().join(sub).is_dir());
        }
    }
}
