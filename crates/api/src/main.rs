use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use retouch_api::config::{ServerConfig, VendorConfig};
use retouch_api::router::build_app_router;
use retouch_api::state::AppState;
use retouch_coord::{CoordConfig, Coordinator, MemoryCoordinator, RedisCoordinator};
use retouch_pipeline::{JobService, PipelineConfig};
use retouch_runninghub::{RunningHubApi, WorkflowBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "retouch_api=debug,retouch_pipeline=debug,retouch_coord=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let coord_config = CoordConfig::from_env().context("Invalid coordinator configuration")?;
    let pipeline_config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let vendor = VendorConfig::from_env().context("Invalid RunningHub configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Shared store ---
    let coord: Arc<dyn Coordinator> = match std::env::var("REDIS_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let coord = RedisCoordinator::new(url.trim(), coord_config)
                .context("Invalid REDIS_URL")?;
            match coord.ping().await {
                Ok(()) => tracing::info!("Shared store reachable"),
                // Jobs submitted meanwhile stay PENDING_ENQUEUE until it is.
                Err(e) => tracing::warn!(error = %e, "Shared store not reachable yet"),
            }
            Arc::new(coord)
        }
        _ => {
            tracing::warn!("REDIS_URL not set; running in single-process mode");
            Arc::new(MemoryCoordinator::new(coord_config))
        }
    };

    // --- Vendor client ---
    let backend: Arc<dyn WorkflowBackend> = Arc::new(RunningHubApi::new(
        vendor.base_url,
        vendor.api_key,
        vendor.workflow_id,
    ));

    // --- Job service ---
    let jobs = JobService::new(pipeline_config, coord, backend);
    jobs.start();

    // --- App state ---
    let state = AppState {
        jobs: Arc::clone(&jobs),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config).context("Invalid server configuration")?;

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    tracing::info!(%addr, session_id = %jobs.session_id(), "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    jobs.shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
