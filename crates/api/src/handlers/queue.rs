//! Handlers for the shared queue overview and the operator clear.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use retouch_pipeline::service::QueueStats;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// What `DELETE /queue` removed from the shared store.
#[derive(Debug, Serialize)]
pub struct ClearedQueue {
    pub queued: usize,
    pub admitted: usize,
}

/// GET /api/v1/queue
///
/// Local per-status counts plus shared queue depth and live admissions.
/// Shared counts are `null` while the store is unreachable.
pub async fn queue_stats(State(state): State<AppState>) -> Json<DataResponse<QueueStats>> {
    Json(DataResponse {
        data: state.jobs.queue_stats().await,
    })
}

/// DELETE /api/v1/queue
///
/// Drain the shared queue and the admission set for every process. Jobs
/// already running keep running; their slot releases become no-ops.
pub async fn clear_global(State(state): State<AppState>) -> AppResult<Json<DataResponse<ClearedQueue>>> {
    let cleared = state.jobs.clear_global().await?;
    Ok(Json(DataResponse {
        data: ClearedQueue {
            queued: cleared.queued,
            admitted: cleared.admitted,
        },
    }))
}
