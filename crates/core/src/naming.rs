//! Deterministic naming of published image artifacts.
//!
//! Convention: `{job_id}/row-{row_index}/compressed-{hash8}-{stem}.jpg`
//!
//! - `row_index` = zero-based position of the row in the manifest
//! - `hash8` = first 8 hex chars of SHA-256 over the full source URI, so two
//!   sources sharing a filename within one row never collide
//! - `stem` = last path segment of the source URI without its extension,
//!   reduced to `[A-Za-z0-9._-]` (fallback `image`)
//!
//! The same (job, row, source) triple always yields the same key, which is
//! what makes re-running a task overwrite rather than duplicate its output.

use sha2::{Digest, Sha256};

use crate::types::JobId;

/// Extension of every published artifact; the transform always emits JPEG.
pub const ARTIFACT_EXTENSION: &str = "jpg";

/// Prefix applied to every published artifact filename.
pub const ARTIFACT_PREFIX: &str = "compressed-";

/// Filename of the enriched manifest published for each job.
pub const RESULT_MANIFEST_NAME: &str = "output.csv";

/// Stem used when a source URI has no usable path segment.
const FALLBACK_STEM: &str = "image";

/// Maximum length of the sanitized stem.
const MAX_STEM_LEN: usize = 64;

/// Extract the filename from a URL by taking the last path segment.
///
/// Strips query parameters and fragments. Returns `None` if no meaningful
/// segment is found.
pub fn source_filename(url: &str) -> Option<&str> {
    let clean = url.split(['?', '#']).next().unwrap_or(url);

    let path = match clean.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => clean,
    };

    path.rsplit('/').find(|s| !s.is_empty())
}

/// Reduce a filename to a filesystem-safe stem without extension.
fn sanitized_stem(filename: &str) -> String {
    let stem = match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    };

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}

/// First 8 hex characters of the SHA-256 digest of `input`.
fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Relative key under which the transformed `source` of row `row_index`
/// of `job_id` is published.
pub fn artifact_key(job_id: &JobId, row_index: usize, source: &str) -> String {
    let stem = sanitized_stem(source_filename(source).unwrap_or(FALLBACK_STEM));
    format!(
        "{job_id}/row-{row_index}/{ARTIFACT_PREFIX}{}-{stem}.{ARTIFACT_EXTENSION}",
        short_hash(source)
    )
}

/// Relative key of the enriched result manifest of `job_id`.
pub fn result_manifest_key(job_id: &JobId) -> String {
    format!("{job_id}/{RESULT_MANIFEST_NAME}")
}
