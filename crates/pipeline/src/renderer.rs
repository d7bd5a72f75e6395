//! [`Renderer`] implementation backed by the `image` and `zip` crates.

use std::path::PathBuf;

use artifex_core::config::DEFAULT_THUMBNAIL_MAX_EDGE;
use artifex_core::job::JobParams;
use artifex_core::render::{RenderError, RenderOutput, Renderer};

use crate::archive;
use crate::imaging::{self, DEFAULT_JPEG_QUALITY};

/// Renders thumbnails, banners and album archives.
#[derive(Debug, Clone)]
pub struct MediaRenderer {
    /// Directory for archives under construction. Should be on the same
    /// filesystem as the artifact store so the final move is a rename.
    scratch_dir: PathBuf,
    /// Longest edge any thumbnail may have, whatever was requested.
    max_thumbnail_edge: u32,
    jpeg_quality: u8,
}

impl MediaRenderer {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            max_thumbnail_edge: DEFAULT_THUMBNAIL_MAX_EDGE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_max_thumbnail_edge(mut self, edge: u32) -> Self {
        self.max_thumbnail_edge = edge.max(1);
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    fn render_thumbnail(
        &self,
        source: &std::path::Path,
        max_width: u32,
        max_height: u32,
    ) -> Result<RenderOutput, RenderError> {
        let image = imaging::decode(source)?;
        let bytes = imaging::thumbnail(
            &image,
            max_width.min(self.max_thumbnail_edge),
            max_height.min(self.max_thumbnail_edge),
            self.jpeg_quality,
        )
        .map_err(failed)?;
        Ok(RenderOutput::Bytes(bytes))
    }

    fn render_banner(
        &self,
        sources: &[PathBuf],
        width: u32,
        height: u32,
    ) -> Result<RenderOutput, RenderError> {
        let images = sources
            .iter()
            .map(|path| imaging::decode(path))
            .collect::<Result<Vec<_>, _>>()?;
        let bytes = imaging::banner(&images, width, height, self.jpeg_quality).map_err(failed)?;
        Ok(RenderOutput::Bytes(bytes))
    }

    fn render_archive(&self, entries: &[PathBuf]) -> Result<RenderOutput, RenderError> {
        std::fs::create_dir_all(&self.scratch_dir).map_err(|e| {
            RenderError::Failed(format!(
                "failed to create scratch directory {}: {e}",
                self.scratch_dir.display()
            ))
        })?;
        let output = self
            .scratch_dir
            .join(format!("archive-{}.zip", uuid::Uuid::new_v4()));
        archive::pack(entries, &output)?;
        Ok(RenderOutput::File(output))
    }
}

impl Renderer for MediaRenderer {
    fn render(&self, params: &JobParams) -> Result<RenderOutput, RenderError> {
        match params {
            JobParams::Thumbnail {
                source,
                max_width,
                max_height,
            } => self.render_thumbnail(source, *max_width, *max_height),
            JobParams::Banner {
                sources,
                width,
                height,
                ..
            } => self.render_banner(sources, *width, *height),
            JobParams::Archive { entries, .. } => self.render_archive(entries),
        }
    }
}

fn failed(e: anyhow::Error) -> RenderError {
    RenderError::Failed(format!("{e:#}"))
}
