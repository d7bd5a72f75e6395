//! The rendering capability contract.
//!
//! The worker pool treats a [`Renderer`] as an opaque, possibly slow,
//! possibly failing synchronous function. Implementations run on the
//! blocking thread pool and must not spawn unbounded concurrency of their own.

use std::path::PathBuf;

use crate::job::JobParams;

/// What a successful render produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutput {
    /// The artifact bytes, to be written by the store.
    Bytes(Vec<u8>),
    /// A finished file the renderer wrote itself; the store moves it into
    /// place.
    File(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The source could not be read or decoded.
    #[error("Invalid source {path}: {message}")]
    InvalidSource { path: PathBuf, message: String },

    /// The renderer does not handle this kind of job.
    #[error("Unsupported job kind: {0}")]
    Unsupported(String),

    /// Any other failure while rendering.
    #[error("{0}")]
    Failed(String),
}

/// An external codec/archiver.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, params: &JobParams) -> Result<RenderOutput, RenderError>;
}

impl<F> Renderer for F
where
    F: Fn(&JobParams) -> Result<RenderOutput, RenderError> + Send + Sync + 'static,
{
    fn render(&self, params: &JobParams) -> Result<RenderOutput, RenderError> {
        self(params)
    }
}
