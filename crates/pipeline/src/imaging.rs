//! Thumbnail and banner rendering.

use std::path::Path;

use anyhow::{Context, Result};
use artifex_core::render::RenderError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, RgbImage};

/// Default JPEG quality for generated images.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Decode the image at `path`.
///
/// Decoding failures are reported as [`RenderError::InvalidSource`] so the
/// failure reason names the offending file.
pub fn decode(path: &Path) -> Result<DynamicImage, RenderError> {
    image::open(path).map_err(|e| RenderError::InvalidSource {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Fit `(width, height)` inside `max_width` x `max_height`, preserving the
/// aspect ratio and never enlarging.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let w = (f64::from(width) * scale).round().max(1.0) as u32;
    let h = (f64::from(height) * scale).round().max(1.0) as u32;
    (w.min(max_width), h.min(max_height))
}

/// Scale `image` to fit within the bounds and encode it as JPEG.
pub fn thumbnail(image: &DynamicImage, max_width: u32, max_height: u32, quality: u8) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let (w, h) = fit_within(width, height, max_width, max_height);

    let scaled = if (w, h) == (width, height) {
        image.to_rgb8()
    } else {
        image.thumbnail_exact(w, h).to_rgb8()
    };
    encode_jpeg(&scaled, quality)
}

/// Lay `images` out left-to-right into a `width` x `height` strip.
///
/// Each image is cropped to fill its cell; the last cell absorbs any
/// remainder of the integer division.
pub fn banner(images: &[DynamicImage], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let count = u32::try_from(images.len()).context("too many banner sources")?;
    anyhow::ensure!(count > 0, "banner requires at least one source");

    let cell = width / count;
    anyhow::ensure!(
        cell > 0,
        "banner width {width} is too narrow for {count} sources"
    );

    let mut canvas = RgbImage::new(width, height);
    for (i, image) in (0u32..).zip(images) {
        let x = cell * i;
        let cell_width = if i + 1 == count { width - x } else { cell };
        let tile = image
            .resize_to_fill(cell_width, height, FilterType::Triangle)
            .to_rgb8();
        imageops::overlay(&mut canvas, &tile, i64::from(x), 0);
    }

    encode_jpeg(&canvas, quality)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .context("failed to encode JPEG")?;
    Ok(bytes)
}
