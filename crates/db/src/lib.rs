//! Job status persistence.
//!
//! The pipeline only ever stores the status projection of a job
//! (`status`, `created_at`, `completed_at`); row-level data stays with the
//! orchestrator. Storage is abstracted behind
//! [`repositories::StatusRepository`] so it can be injected, with
//! [`repositories::InMemoryStatusRepo`] as the default backend.

pub mod models;
pub mod repositories;

pub use models::job::JobRecord;
pub use models::status::JobStatus;
pub use repositories::{InMemoryStatusRepo, StatusRepoError, StatusRepository};
