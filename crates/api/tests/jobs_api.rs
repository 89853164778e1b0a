//! Integration tests for `/api/v1/jobs`, `/queue`, and `/sessions`.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::*;
use retouch_pipeline::JobService;

/// Poll GET /jobs/{id} until the job reports `status`.
async fn wait_for_status(app: &axum::Router, id: &str, status: &str) -> serde_json::Value {
    let uri = format!("/api/v1/jobs/{id}");
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let json = body_json(get(app.clone(), &uri).await).await;
            if json["data"]["status"] == status {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {id} never reached {status}"))
}

async fn stop(jobs: &JobService) {
    jobs.shutdown(Duration::from_secs(1)).await;
}

// ---------------------------------------------------------------------------
// Test: batch upload creates one job per file, in order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_upload_creates_one_job_per_file() {
    let (app, jobs) = build_test_app();

    let response = post_files(
        app.clone(),
        "/api/v1/jobs",
        &[("cat.png", b"png-bytes"), ("dog.JPG", b"jpg-bytes")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let created = json["data"].as_array().unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0]["display_name"], "cat.png");
    assert_eq!(created[1]["display_name"], "dog.JPG");

    let listed = body_json(get(app, "/api/v1/jobs").await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 2);

    stop(&jobs).await;
}

// ---------------------------------------------------------------------------
// Test: unsupported files reject the whole batch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_file_rejects_batch() {
    let (app, jobs) = build_test_app();

    let response = post_files(
        app.clone(),
        "/api/v1/jobs",
        &[("cat.png", b"png-bytes"), ("notes.txt", b"hello")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");

    assert!(jobs.list_jobs().await.is_empty());
    stop(&jobs).await;
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let (app, jobs) = build_test_app();

    let response = post_files(app, "/api/v1/jobs", &[]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    stop(&jobs).await;
}

// ---------------------------------------------------------------------------
// Test: a finished job's result downloads as an attachment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finished_job_result_downloads() {
    let (app, jobs) = build_test_app();

    let json = body_json(post_files(app.clone(), "/api/v1/jobs", &[("cat.png", b"png")]).await).await;
    let id = json["data"][0]["job_id"].as_str().unwrap().to_string();

    let done = wait_for_status(&app, &id, "SUCCEEDED").await;
    assert_eq!(done["data"]["progress"], 100);
    assert_eq!(done["data"]["result_name"], "optimized_cat.png");

    let response = get(app, &format!("/api/v1/jobs/{id}/result")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"optimized_cat.png\""
    );
    assert_eq!(body_bytes(response).await, RESULT_BYTES);

    stop(&jobs).await;
}

// ---------------------------------------------------------------------------
// Test: unknown ids and missing results
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let (app, jobs) = build_test_app();
    let id = uuid::Uuid::new_v4();

    let response = get(app.clone(), &format!("/api/v1/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(app, &format!("/api/v1/jobs/{id}/result")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    stop(&jobs).await;
}

#[tokio::test]
async fn malformed_job_id_is_rejected() {
    let (app, jobs) = build_test_app();

    let response = get(app, "/api/v1/jobs/not-a-uuid").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    stop(&jobs).await;
}

// ---------------------------------------------------------------------------
// Test: clearing local and shared state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_local_removes_finished_jobs() {
    let (app, jobs) = build_test_app();
    let json = body_json(post_files(app.clone(), "/api/v1/jobs", &[("a.png", b"a")]).await).await;
    let id = json["data"][0]["job_id"].as_str().unwrap().to_string();
    wait_for_status(&app, &id, "SUCCEEDED").await;

    let response = delete(app.clone(), "/api/v1/jobs").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["removed"], 1);

    let listed = body_json(get(app, "/api/v1/jobs").await).await;
    assert!(listed["data"].as_array().unwrap().is_empty());

    stop(&jobs).await;
}

#[tokio::test]
async fn queue_stats_and_clear_global() {
    let (app, jobs) = build_test_app();

    let stats = body_json(get(app.clone(), "/api/v1/queue").await).await;
    assert_eq!(stats["data"]["shared_queued"], 0);
    assert_eq!(stats["data"]["shared_admitted"], 0);
    assert_eq!(stats["data"]["max_global_concurrent"], 2);
    assert_eq!(stats["data"]["local"]["total"], 0);

    let response = delete(app, "/api/v1/queue").await;
    assert_eq!(response.status(), StatusCode::OK);
    let cleared = body_json(response).await;
    assert_eq!(cleared["data"]["queued"], 0);
    assert_eq!(cleared["data"]["admitted"], 0);

    stop(&jobs).await;
}

// ---------------------------------------------------------------------------
// Test: session recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn current_session_can_be_recovered() {
    let (app, jobs) = build_test_app();
    let json = body_json(post_files(app.clone(), "/api/v1/jobs", &[("a.png", b"a")]).await).await;
    let id = json["data"][0]["job_id"].as_str().unwrap().to_string();
    wait_for_status(&app, &id, "SUCCEEDED").await;
    jobs.persist_snapshot().await.unwrap();

    let current = body_json(get(app.clone(), "/api/v1/sessions/current").await).await;
    let session_id = current["data"]["session_id"].as_str().unwrap().to_string();
    assert_eq!(session_id, "api-test-session");

    let response = get(app, &format!("/api/v1/sessions/{session_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let recovered = body_json(response).await;
    assert_eq!(recovered["data"]["jobs"][0]["job_id"], id);
    assert_eq!(recovered["data"]["jobs"][0]["recovery"], "succeeded");

    stop(&jobs).await;
}

#[tokio::test]
async fn unknown_session_returns_404() {
    let (app, jobs) = build_test_app();

    let response = get(app, "/api/v1/sessions/no-such-session").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    stop(&jobs).await;
}
