pub mod health;
pub mod jobs;
pub mod queue;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                     submit batch (POST multipart), list, clear local (DELETE)
/// /jobs/{id}                get
/// /jobs/{id}/result         download result
///
/// /queue                    stats, clear shared queue and slots (DELETE)
///
/// /sessions/current         this process's session id
/// /sessions/{session_id}    recover a saved session
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/queue", queue::router())
        .route("/sessions/current", get(handlers::sessions::current_session))
        .route("/sessions/{session_id}", get(handlers::sessions::recover_session))
}
