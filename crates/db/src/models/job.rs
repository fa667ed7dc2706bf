use imgpipe_core::types::{JobId, Timestamp};
use serde::Serialize;

use crate::models::status::JobStatus;

/// Status projection of a job, as seen by polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    /// Set exactly once, when the job reaches a terminal status.
    pub completed_at: Option<Timestamp>,
}

impl JobRecord {
    /// A freshly admitted job.
    pub fn pending(job_id: JobId, created_at: Timestamp) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            created_at,
            completed_at: None,
        }
    }
}
