use axum::routing::get;
use axum::Router;

use crate::handlers::queue;
use crate::state::AppState;

/// Routes mounted at `/queue`.
///
/// ```text
/// GET    /   -> queue_stats
/// DELETE /   -> clear_global (operator action)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(queue::queue_stats).delete(queue::clear_global))
}
