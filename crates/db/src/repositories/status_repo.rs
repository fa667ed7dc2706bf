//! Status repository: job id -> status projection.
//!
//! Every mutation replaces the whole [`JobRecord`] under a single write
//! lock, so a concurrent reader observes either the old projection or the
//! new one, never a mix of the two.

use std::collections::HashMap;

use async_trait::async_trait;
use imgpipe_core::error::CoreError;
use imgpipe_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

use crate::models::job::JobRecord;
use crate::models::status::JobStatus;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StatusRepoError {
    /// `create` was called twice for the same id. Ids are generated
    /// internally, so this is a programming error.
    #[error("Job {0} already exists")]
    AlreadyExists(JobId),

    #[error("Job {0} not found")]
    NotFound(JobId),

    /// Terminal statuses are final.
    #[error("Job {job_id} is already {status}")]
    TerminalState { job_id: JobId, status: JobStatus },
}

impl From<StatusRepoError> for CoreError {
    fn from(err: StatusRepoError) -> Self {
        match err {
            StatusRepoError::NotFound(id) => CoreError::NotFound {
                entity: "Job",
                id: id.to_string(),
            },
            StatusRepoError::TerminalState { .. } => CoreError::Conflict(err.to_string()),
            StatusRepoError::AlreadyExists(_) => CoreError::Internal(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Storage of job status projections.
///
/// Implementations must be safe to call concurrently from the admission
/// path and from background job runs without any external locking.
#[async_trait]
pub trait StatusRepository: Send + Sync {
    /// Insert a `Pending` record for a new job.
    async fn create(&self, job_id: &JobId) -> Result<JobRecord, StatusRepoError>;

    /// Atomically move a job to `status`.
    ///
    /// Terminal statuses record `completed_at` (defaulting to now);
    /// non-terminal statuses always clear it. Leaving a terminal status
    /// is rejected.
    async fn set_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        completed_at: Option<Timestamp>,
    ) -> Result<JobRecord, StatusRepoError>;

    /// Current projection, or `None` for an unknown id.
    async fn get(&self, job_id: &JobId) -> Option<JobRecord>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Process-local status repository. Records live until the process exits.
#[derive(Debug, Default)]
pub struct InMemoryStatusRepo {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryStatusRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs with the given status.
    pub async fn count_by_status(&self, status: JobStatus) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl StatusRepository for InMemoryStatusRepo {
    async fn create(&self, job_id: &JobId) -> Result<JobRecord, StatusRepoError> {
        let mut records = self.records.write().await;
        if records.contains_key(job_id) {
            tracing::error!(job_id = %job_id, "Duplicate job id on create");
            return Err(StatusRepoError::AlreadyExists(job_id.clone()));
        }

        let record = JobRecord::pending(job_id.clone(), chrono::Utc::now());
        records.insert(job_id.clone(), record.clone());
        Ok(record)
    }

    async fn set_status(
        &self,
        job_id: &JobId,
        status: JobStatus,
        completed_at: Option<Timestamp>,
    ) -> Result<JobRecord, StatusRepoError> {
        let mut records = self.records.write().await;
        let current = records
            .get(job_id)
            .ok_or_else(|| StatusRepoError::NotFound(job_id.clone()))?;

        if current.status.is_terminal() {
            return Err(StatusRepoError::TerminalState {
                job_id: job_id.clone(),
                status: current.status,
            });
        }

        let completed_at = if status.is_terminal() {
            Some(completed_at.unwrap_or_else(chrono::Utc::now))
        } else {
            None
        };

        let next = JobRecord {
            job_id: job_id.clone(),
            status,
            created_at: current.created_at,
            completed_at,
        };
        records.insert(job_id.clone(), next.clone());
        Ok(next)
    }

    async fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.records.read().await.get(job_id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
