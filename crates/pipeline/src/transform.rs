//! Transform stage: fetch one source image, resize + recompress it, and
//! publish the result.
//!
//! Each step fails independently with its own [`ImageError`] variant. The
//! stage never retries; re-running a task is safe because destinations
//! are derived deterministically by the caller.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use serde::Serialize;

use crate::fetch::{validate_source_uri, FetchError, Fetcher};
use crate::publish::{PublishError, Publisher};

/// Default resize target width in pixels.
pub const DEFAULT_TARGET_WIDTH: u32 = 800;

/// Default JPEG recompression quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Per-image failure category, as recorded in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageErrorKind {
    Fetch,
    Transform,
    Publish,
}

impl ImageErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageErrorKind::Fetch => "fetch",
            ImageErrorKind::Transform => "transform",
            ImageErrorKind::Publish => "publish",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),
}

impl ImageError {
    pub fn kind(&self) -> ImageErrorKind {
        match self {
            ImageError::Fetch(_) => ImageErrorKind::Fetch,
            ImageError::Transform(_) => ImageErrorKind::Transform,
            ImageError::Publish(_) => ImageErrorKind::Publish,
        }
    }
}

// ---------------------------------------------------------------------------
// Resize + recompress
// ---------------------------------------------------------------------------

/// Fixed transform parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSpec {
    pub target_width: u32,
    pub quality: u8,
}

impl Default for ResizeSpec {
    fn default() -> Self {
        Self {
            target_width: DEFAULT_TARGET_WIDTH,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Height that keeps the aspect ratio of `width` x `height` at
/// `target_width`, rounded to the nearest pixel and at least 1.
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return 1;
    }
    let scaled = (u64::from(height) * u64::from(target_width) + u64::from(width) / 2)
        / u64::from(width);
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}

/// Decode `bytes`, scale to `spec.target_width` wide, and re-encode as JPEG.
///
/// CPU-bound; call from a blocking thread. Output is deterministic for a
/// given input and spec.
pub fn resize_and_recompress(bytes: &[u8], spec: ResizeSpec) -> Result<Vec<u8>, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let height = scaled_height(decoded.width(), decoded.height(), spec.target_width);
    let resized = decoded
        .resize_exact(spec.target_width, height, FilterType::Lanczos3)
        .to_rgb8();

    let mut out = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut out, spec.quality).encode_image(&resized)?;
    Ok(out.into_inner())
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One image through fetch, resize + recompress, publish.
///
/// Implemented by [`FetchResizePublish`] in production and by test doubles
/// that script failures or count concurrent entries.
#[async_trait]
pub trait ImageTransform: Send + Sync {
    /// Transform `source` and publish it under `destination_key`, returning
    /// the output locator.
    async fn transform(&self, source: &str, destination_key: &str) -> Result<String, ImageError>;
}

/// The production transform stage.
pub struct FetchResizePublish {
    fetcher: Arc<dyn Fetcher>,
    publisher: Arc<dyn Publisher>,
    spec: ResizeSpec,
}

impl FetchResizePublish {
    pub fn new(fetcher: Arc<dyn Fetcher>, publisher: Arc<dyn Publisher>, spec: ResizeSpec) -> Self {
        Self {
            fetcher,
            publisher,
            spec,
        }
    }
}

#[async_trait]
impl ImageTransform for FetchResizePublish {
    async fn transform(&self, source: &str, destination_key: &str) -> Result<String, ImageError> {
        let url = validate_source_uri(source)?;
        let bytes = self.fetcher.fetch(&url).await?;

        let spec = self.spec;
        let encoded = tokio::task::spawn_blocking(move || resize_and_recompress(&bytes, spec))
            .await
            .map_err(|e| ImageError::Transform(format!("resize task aborted: {e}")))?
            .map_err(|e| ImageError::Transform(e.to_string()))?;

        let locator = self.publisher.publish(destination_key, &encoded).await?;
        Ok(locator)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
