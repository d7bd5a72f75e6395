//! Concrete rendering capability for the media-job subsystem.
//!
//! [`MediaRenderer`] implements [`artifex_core::render::Renderer`]:
//!
//! - thumbnails and banners are decoded and resized with the `image` crate
//!   and encoded as JPEG bytes,
//! - album archives are packed with the `zip` crate into a scratch file that
//!   the artifact store then moves into place.
//!
//! Internally everything is `anyhow`; errors are converted to
//! [`RenderError`](artifex_core::render::RenderError) at the trait boundary.

pub mod archive;
pub mod imaging;
pub mod renderer;

pub use renderer::MediaRenderer;
