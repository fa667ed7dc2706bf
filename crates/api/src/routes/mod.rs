pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /upload-csv                    submit a manifest (multipart)
/// /status/{id}                   job status
/// /status/{id}/manifest          result manifest (CSV)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(jobs::router())
}
