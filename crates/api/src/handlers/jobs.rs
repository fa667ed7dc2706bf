//! Handlers for manifest upload, status polling, and result download.

use axum::extract::{Multipart, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use imgpipe_core::error::CoreError;
use imgpipe_core::types::{JobId, Timestamp};
use imgpipe_db::{JobRecord, JobStatus};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Multipart field carrying the manifest.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub request_id: JobId,
}

/// Status projection as exposed to clients.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub request_id: JobId,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

impl From<JobRecord> for StatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            request_id: record.job_id,
            status: record.status,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// POST /api/v1/upload-csv
///
/// Accepts a multipart form with a required `file` field holding the CSV
/// manifest. Returns 202 with the request id as soon as the job exists;
/// processing continues in the background.
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut manifest: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        manifest = Some(data.to_vec());
    }

    let manifest = manifest
        .ok_or_else(|| AppError::BadRequest(format!("Missing required '{FILE_FIELD}' field")))?;
    if manifest.is_empty() {
        return Err(AppError::BadRequest("Uploaded manifest is empty".into()));
    }

    let request_id = state.orchestrator.submit(manifest).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitResponse { request_id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/status/{id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<StatusResponse>>> {
    let job_id = JobId::from(id);
    let record = state
        .orchestrator
        .query(&job_id)
        .await
        .ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;

    Ok(Json(DataResponse {
        data: record.into(),
    }))
}

/// GET /api/v1/status/{id}/manifest
///
/// The enriched manifest of a completed job, as `text/csv`.
pub async fn get_manifest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let bytes = state.orchestrator.result_manifest(&JobId::from(id)).await?;
    Ok(([(CONTENT_TYPE, "text/csv; charset=utf-8")], bytes))
}
