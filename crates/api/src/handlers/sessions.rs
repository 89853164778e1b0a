//! Session snapshot recovery.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use retouch_core::error::CoreError;
use retouch_pipeline::snapshot::RecoveredSession;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CurrentSession {
    pub session_id: String,
    pub instance_id: String,
}

/// GET /api/v1/sessions/current
///
/// The session id under which this process writes snapshots. A reloaded
/// front end keeps it to recover its jobs later.
pub async fn current_session(State(state): State<AppState>) -> Json<DataResponse<CurrentSession>> {
    Json(DataResponse {
        data: CurrentSession {
            session_id: state.jobs.session_id().to_string(),
            instance_id: state.jobs.instance_id().to_string(),
        },
    })
}

/// GET /api/v1/sessions/{session_id}
///
/// The last snapshot of a session, each job marked as succeeded, failed, or
/// needing re-submission. Nothing is resumed.
pub async fn recover_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<DataResponse<RecoveredSession>>> {
    let session = state
        .jobs
        .recover_session(&session_id)
        .await?
        .ok_or_else(|| CoreError::NotFound {
            entity: "Session",
            id: session_id.clone(),
        })?;
    Ok(Json(DataResponse { data: session }))
}
