//! Route definitions for manifest upload and job status.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted under `/api/v1`.
///
/// ```text
/// POST   /upload-csv              -> upload_csv
/// GET    /status/{id}             -> get_status
/// GET    /status/{id}/manifest    -> get_manifest
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-csv", post(jobs::upload_csv))
        .route("/status/{id}", get(jobs::get_status))
        .route("/status/{id}/manifest", get(jobs::get_manifest))
}
