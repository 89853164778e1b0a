//! Route definitions for the `/jobs` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> submit_jobs (multipart)
/// DELETE /                -> clear_local
/// GET    /{id}            -> get_job
/// GET    /{id}/result     -> download_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(jobs::list_jobs)
                .post(jobs::submit_jobs)
                .delete(jobs::clear_local),
        )
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/result", get(jobs::download_result))
}
