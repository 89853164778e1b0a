use std::sync::Arc;

use retouch_pipeline::JobService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Job submission and tracking for this process.
    pub jobs: Arc<JobService>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
