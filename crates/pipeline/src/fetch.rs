//! Source image retrieval.
//!
//! [`validate_source_uri`] rejects anything that is not an absolute
//! `http`/`https` URI before a request is attempted. [`HttpFetcher`] then
//! performs a single GET with a per-request timeout and a cap on the body
//! size; there are no retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The locator is not a fetchable absolute URI.
    #[error("Invalid source URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Source returned HTTP {0}")]
    HttpStatus(u16),

    /// The body exceeds the configured size cap.
    #[error("Source body exceeds {limit} bytes")]
    TooLarge { limit: u64 },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Parse `uri` and check it is an absolute `http`/`https` URI with a host.
pub fn validate_source_uri(uri: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUri {
        uri: uri.to_string(),
        reason,
    };

    let url = Url::parse(uri.trim()).map_err(|e| invalid(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Retrieves the raw bytes behind a validated source URI.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// [`Fetcher`] over HTTP(S) using a shared `reqwest` client.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Create a fetcher whose requests time out after `timeout` and whose
    /// bodies may not exceed `max_bytes`.
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client, max_bytes }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let too_large = FetchError::TooLarge {
            limit: self.max_bytes,
        };
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(too_large);
        }

        // Content-Length may be absent or wrong, so the cap also applies
        // while streaming.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(too_large);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
