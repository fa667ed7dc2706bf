//! Artifact publication.
//!
//! A [`Publisher`] stores bytes under a relative key and hands back the
//! locator clients should use to reach them. [`LocalPublisher`] writes to a
//! directory tree and optionally maps keys onto a public base URL.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The key would escape the publication root.
    #[error("Invalid artifact key: '{0}'")]
    InvalidKey(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous content, and
    /// return the artifact's locator.
    async fn publish(&self, key: &str, bytes: &[u8]) -> Result<String, PublishError>;

    /// Read back a previously published artifact, `None` if absent.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PublishError>;
}

/// Publishes artifacts below a local root directory.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalPublisher {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Locator for `key`: the public URL when configured, else the file path.
    pub fn locator(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => self.root.join(key).to_string_lossy().into_owned(),
        }
    }

    /// Resolve `key` to a path, refusing absolute keys and `..` segments.
    fn resolve(&self, key: &str) -> Result<PathBuf, PublishError> {
        let relative = Path::new(key);
        let is_safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !is_safe {
            return Err(PublishError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(format!(".{}.part", Uuid::new_v4().simple()));
    PathBuf::from(staging)
}

fn io_error(path: &Path, source: std::io::Error) -> PublishError {
    PublishError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish(&self, key: &str, bytes: &[u8]) -> Result<String, PublishError> {
        let path = self.resolve(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        // Each write stages to its own file so concurrent publishes of one
        // key never consume each other's staging file. The rename is atomic.
        let staging = staging_path(&path);

        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|e| io_error(&staging, e))?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error(&path, e));
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Artifact published");
        Ok(self.locator(key))
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PublishError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
