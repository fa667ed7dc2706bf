use std::path::PathBuf;
use std::time::Duration;

use imgpipe_core::error::CoreError;
use imgpipe_core::manifest::{ManifestColumns, DEFAULT_INPUT_COLUMN, DEFAULT_OUTPUT_COLUMN};

use crate::transform::{ResizeSpec, DEFAULT_JPEG_QUALITY, DEFAULT_TARGET_WIDTH};

/// Default bound on simultaneously in-flight image transforms.
pub const DEFAULT_MAX_CONCURRENT_IMAGES: usize = 8;

/// Default per-request timeout for source fetches.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default cap on a fetched source body (50 MiB).
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 50 * 1024 * 1024;

/// Pipeline configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory artifacts are published under.
    pub output_dir: PathBuf,
    /// When set, output locators are `{public_base_url}/{key}` instead of
    /// local file paths.
    pub public_base_url: Option<String>,
    /// Upper bound on in-flight fetch/transform/publish operations across
    /// all jobs of the process.
    pub max_concurrent_images: usize,
    /// Resize target width in pixels; height follows the aspect ratio.
    pub target_width: u32,
    /// JPEG recompression quality (1-100).
    pub jpeg_quality: u8,
    /// Per-request timeout for source fetches.
    pub fetch_timeout_secs: u64,
    /// Largest source body accepted, in bytes.
    pub max_source_bytes: u64,
    /// Designated manifest columns.
    pub columns: ManifestColumns,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./downloads"),
            public_base_url: None,
            max_concurrent_images: DEFAULT_MAX_CONCURRENT_IMAGES,
            target_width: DEFAULT_TARGET_WIDTH,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            columns: ManifestColumns::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default             |
    /// |-------------------------|---------------------|
    /// | `OUTPUT_DIR`            | `./downloads`       |
    /// | `PUBLIC_BASE_URL`       | unset               |
    /// | `MAX_CONCURRENT_IMAGES` | `8`                 |
    /// | `TARGET_WIDTH`          | `800`               |
    /// | `JPEG_QUALITY`          | `50`                |
    /// | `FETCH_TIMEOUT_SECS`    | `30`                |
    /// | `MAX_SOURCE_BYTES`      | `52428800`          |
    /// | `INPUT_COLUMN`          | `Input Image Urls`  |
    /// | `OUTPUT_COLUMN`         | `Output Image Urls` |
    pub fn from_env() -> Self {
        let output_dir = std::env::var("OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./downloads"));

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let max_concurrent_images: usize = std::env::var("MAX_CONCURRENT_IMAGES")
            .unwrap_or_else(|_| DEFAULT_MAX_CONCURRENT_IMAGES.to_string())
            .parse()
            .expect("MAX_CONCURRENT_IMAGES must be a valid usize");

        let target_width: u32 = std::env::var("TARGET_WIDTH")
            .unwrap_or_else(|_| DEFAULT_TARGET_WIDTH.to_string())
            .parse()
            .expect("TARGET_WIDTH must be a valid u32");

        let jpeg_quality: u8 = std::env::var("JPEG_QUALITY")
            .unwrap_or_else(|_| DEFAULT_JPEG_QUALITY.to_string())
            .parse()
            .expect("JPEG_QUALITY must be a valid u8");

        let fetch_timeout_secs: u64 = std::env::var("FETCH_TIMEOUT_SECS")
            .unwrap_or_else(|_| DEFAULT_FETCH_TIMEOUT_SECS.to_string())
            .parse()
            .expect("FETCH_TIMEOUT_SECS must be a valid u64");

        let max_source_bytes: u64 = std::env::var("MAX_SOURCE_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_SOURCE_BYTES.to_string())
            .parse()
            .expect("MAX_SOURCE_BYTES must be a valid u64");

        let columns = ManifestColumns {
            input: std::env::var("INPUT_COLUMN").unwrap_or_else(|_| DEFAULT_INPUT_COLUMN.into()),
            output: std::env::var("OUTPUT_COLUMN")
                .unwrap_or_else(|_| DEFAULT_OUTPUT_COLUMN.into()),
        };

        Self {
            output_dir,
            public_base_url,
            max_concurrent_images,
            target_width,
            jpeg_quality,
            fetch_timeout_secs,
            max_source_bytes,
            columns,
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrent_images == 0 {
            return Err(CoreError::Validation(
                "MAX_CONCURRENT_IMAGES must be at least 1".to_string(),
            ));
        }
        if self.target_width == 0 {
            return Err(CoreError::Validation(
                "TARGET_WIDTH must be at least 1".to_string(),
            ));
        }
        if self.max_source_bytes == 0 {
            return Err(CoreError::Validation(
                "MAX_SOURCE_BYTES must be at least 1".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(CoreError::Validation(format!(
                "JPEG_QUALITY must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }
        if self.columns.input.is_empty() || self.columns.output.is_empty() {
            return Err(CoreError::Validation(
                "Manifest column names must not be empty".to_string(),
            ));
        }
        if self.columns.input == self.columns.output {
            return Err(CoreError::Validation(
                "Input and output columns must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resize_spec(&self) -> ResizeSpec {
        ResizeSpec {
            target_width: self.target_width,
            quality: self.jpeg_quality,
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
