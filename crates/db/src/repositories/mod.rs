//! Repository layer for job status records.

mod status_repo;

pub use status_repo::{InMemoryStatusRepo, StatusRepoError, StatusRepository};
