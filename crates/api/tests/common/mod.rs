#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use retouch_api::config::ServerConfig;
use retouch_api::router::build_app_router;
use retouch_api::state::AppState;
use retouch_coord::{CoordConfig, MemoryCoordinator};
use retouch_core::job::{JobPayload, NodeOverride};
use retouch_pipeline::{JobService, PipelineConfig};
use retouch_runninghub::{RemoteStatus, RunningHubApiError, WorkflowBackend};

pub const RESULT_BYTES: &[u8] = b"optimized-bytes";
pub const BOUNDARY: &str = "retouch-test-boundary";

/// Vendor stand-in that finishes every task on the first poll.
pub struct InstantBackend;

#[async_trait]
impl WorkflowBackend for InstantBackend {
    async fn upload(
        &self,
        _payload: &JobPayload,
        display_name: &str,
    ) -> Result<String, RunningHubApiError> {
        Ok(format!("api/{display_name}"))
    }

    async fn submit(&self, _node_overrides: &[NodeOverride]) -> Result<String, RunningHubApiError> {
        Ok("task-1".to_string())
    }

    async fn poll(&self, _external_job_id: &str) -> Result<RemoteStatus, RunningHubApiError> {
        Ok(RemoteStatus::Success)
    }

    async fn fetch_output(&self, _external_job_id: &str) -> Result<String, RunningHubApiError> {
        Ok("https://cdn.example/out.png".to_string())
    }

    async fn download(&self, _result_url: &str) -> Result<Vec<u8>, RunningHubApiError> {
        Ok(RESULT_BYTES.to_vec())
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        max_upload_bytes: 1024 * 1024,
    }
}

/// Pipeline settings that finish an instant job in a few milliseconds.
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        dispatch_interval: Duration::from_millis(5),
        poll_interval: Duration::from_millis(5),
        snapshot_interval: Duration::from_millis(50),
        session_id: "api-test-session".to_string(),
        ..Default::default()
    }
}

/// Build the full application router backed by an in-memory store.
///
/// Uses the same [`build_app_router`] as `main.rs`, so tests exercise the
/// production middleware stack. Background loops are started.
pub fn build_test_app() -> (Router, Arc<JobService>) {
    let config = test_config();
    let coord = Arc::new(MemoryCoordinator::new(CoordConfig::new(2)));
    let jobs = JobService::new(test_pipeline_config(), coord, Arc::new(InstantBackend));
    jobs.start();

    let state = AppState {
        jobs: Arc::clone(&jobs),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config).unwrap();
    (app, jobs)
}

pub async fn send(app: Router, method: Method, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri).await
}

/// POST a multipart body with one file field per `(file_name, bytes)`.
pub async fn post_files(app: Router, uri: &str, files: &[(&str, &[u8])]) -> Response<Body> {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
