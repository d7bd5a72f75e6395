//! Album archive packing.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use artifex_core::keys::normalize_path;
use artifex_core::render::RenderError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Pack `entries` into a new zip file at `output`.
///
/// Entries are stored uncompressed (the members are already-compressed
/// media). Duplicate paths are packed once; distinct paths sharing a file
/// name get a numeric suffix so every entry name in the archive is unique.
pub fn pack(entries: &[PathBuf], output: &Path) -> Result<(), RenderError> {
    let partial = PartialOutput { path: output };
    write_archive(entries, output)?;
    partial.keep();
    Ok(())
}

/// Removes a half-written archive on drop, including while unwinding from a
/// panic, unless [`keep`](Self::keep) was called.
struct PartialOutput<'a> {
    path: &'a Path,
}

impl PartialOutput<'_> {
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl Drop for PartialOutput<'_> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.path);
    }
}

fn write_archive(entries: &[PathBuf], output: &Path) -> Result<(), RenderError> {
    let file = File::create(output)
        .with_context(|| format!("failed to create archive {}", output.display()))
        .map_err(failed)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .large_file(true);

    let mut seen_paths = HashSet::new();
    let mut names = EntryNames::default();

    for entry in entries {
        let normalized = normalize_path(entry);
        if !seen_paths.insert(normalized.clone()) {
            continue;
        }

        let mut source = File::open(&normalized).map_err(|e| RenderError::InvalidSource {
            path: entry.clone(),
            message: e.to_string(),
        })?;
        let name = names.assign(&normalized);

        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("failed to start archive entry {name}"))
            .map_err(failed)?;
        io::copy(&mut source, &mut writer)
            .with_context(|| format!("failed to copy {} into archive", entry.display()))
            .map_err(failed)?;
    }

    let inner = writer
        .finish()
        .context("failed to finalize archive")
        .map_err(failed)?;
    let file = inner
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush archive: {}", e.error()))
        .map_err(failed)?;
    file.sync_all()
        .context("failed to sync archive")
        .map_err(failed)?;

    tracing::debug!(
        output = %output.display(),
        entries = seen_paths.len(),
        "Archive packed"
    );
    Ok(())
}

fn failed(e: anyhow::Error) -> RenderError {
    RenderError::Failed(format!("{e:#}"))
}

/// Hands out unique entry names based on file names.
#[derive(Default)]
struct EntryNames {
    used: HashSet<String>,
}

impl EntryNames {
    fn assign(&mut self, path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());

        if self.used.insert(file_name.clone()) {
            return file_name;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut n = 2;
        loop {
            let candidate = format!("{stem}-{n}{extension}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
