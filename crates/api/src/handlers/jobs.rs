//! Handlers for the `/jobs` resource.
//!
//! Jobs are local to this process: listing and downloads only see jobs
//! submitted here.

use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use retouch_core::job::JobPayload;
use retouch_core::types::JobId;
use retouch_pipeline::JobSnapshot;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Accepted image extensions and the content type assumed for each.
const ACCEPTED_IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
];

/// Result of clearing local jobs.
#[derive(Debug, Serialize)]
pub struct ClearedJobs {
    pub removed: usize,
}

/// Content type for an accepted image file name, or `None` if the
/// extension is not accepted.
pub fn image_content_type(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ACCEPTED_IMAGE_TYPES
        .iter()
        .find(|(accepted, _)| *accepted == ext)
        .map(|(_, content_type)| *content_type)
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Accept one or more image files as multipart fields and create one job per
/// file, named after the file. Every file is validated before any job is
/// created. Returns 201 with the created jobs in upload order.
pub async fn submit_jobs(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<Vec<JobSnapshot>>>)> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        // Plain form fields carry no file.
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = image_content_type(&file_name).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Unsupported file type for '{file_name}' (accepted: png, jpg, jpeg, webp)"
            ))
        })?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        if data.is_empty() {
            return Err(AppError::BadRequest(format!("File '{file_name}' is empty")));
        }

        files.push((file_name, JobPayload::new(data.to_vec(), content_type)));
    }

    if files.is_empty() {
        return Err(AppError::BadRequest(
            "No files received in multipart upload".to_string(),
        ));
    }

    let mut created = Vec::with_capacity(files.len());
    for (file_name, payload) in files {
        let job_id = state.jobs.submit_job(payload, &file_name).await?;
        created.push(state.jobs.get_job(job_id).await?);
    }

    tracing::info!(count = created.len(), "Batch submitted");

    Ok((StatusCode::CREATED, Json(DataResponse { data: created })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Local jobs in submission order.
pub async fn list_jobs(State(state): State<AppState>) -> Json<DataResponse<Vec<JobSnapshot>>> {
    Json(DataResponse {
        data: state.jobs.list_jobs().await,
    })
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<Json<DataResponse<JobSnapshot>>> {
    let job = state.jobs.get_job(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/result
///
/// Download the result image of a succeeded job as an attachment. Returns
/// 409 while the job has no result.
pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let result = state.jobs.job_result(job_id).await?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        result.file_name.replace(['"', '\\'], "_")
    );

    Ok((
        [
            (CONTENT_TYPE, result.content_type),
            (CONTENT_DISPOSITION, disposition),
        ],
        result.bytes.as_ref().clone(),
    ))
}

// ---------------------------------------------------------------------------
// Clear
// ---------------------------------------------------------------------------

/// DELETE /api/v1/jobs
///
/// Forget this process's jobs that are not currently running. Their queue
/// entries, if any, are discarded when next dequeued.
pub async fn clear_local(State(state): State<AppState>) -> Json<DataResponse<ClearedJobs>> {
    let removed = state.jobs.clear_local().await;
    Json(DataResponse {
        data: ClearedJobs { removed },
    })
}
