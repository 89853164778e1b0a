//! Session snapshots and what a reloaded front end can recover.

mod common;

use std::time::Duration;

use retouch_core::job::JobStatus;
use retouch_pipeline::snapshot::RecoveryState;
use retouch_pipeline::PipelineConfig;
use retouch_runninghub::RemoteStatus;

use common::*;

#[tokio::test(start_paused = true)]
async fn recovered_session_marks_unfinished_jobs_for_resubmission() {
    let coord = ObservedCoordinator::new(2);
    let service = build_service(test_config(), coord.clone(), MockBackend::succeeding_after(1));

    let done_id = service.submit_job(png(1), "done.png").await.unwrap();
    service.dispatch_once().await;
    wait_terminal(&service, &[done_id]).await;

    coord.set_down(true);
    let parked_id = service.submit_job(png(2), "parked.png").await.unwrap();
    coord.set_down(false);
    service.persist_snapshot().await.unwrap();

    // A reloaded front end gets a new service with a fresh session.
    let reloaded = build_service(
        PipelineConfig {
            session_id: "reloaded".into(),
            ..test_config()
        },
        coord.clone(),
        MockBackend::succeeding_after(0),
    );
    let session = reloaded
        .recover_session("test-session")
        .await
        .unwrap()
        .expect("snapshot should exist");

    assert_eq!(session.session_id, "test-session");
    assert_eq!(session.jobs.len(), 2);
    let done = session.jobs.iter().find(|j| j.job.job_id == done_id).unwrap();
    assert_eq!(done.recovery, RecoveryState::Succeeded);
    assert_eq!(done.job.result_name.as_deref(), Some("optimized_done.png"));
    let parked = session.jobs.iter().find(|j| j.job.job_id == parked_id).unwrap();
    assert_eq!(parked.job.status, JobStatus::PendingEnqueue);
    assert_eq!(parked.recovery, RecoveryState::NeedsResubmission);
}

#[tokio::test(start_paused = true)]
async fn failed_job_recovers_as_failed() {
    let coord = ObservedCoordinator::new(2);
    let backend = MockBackend::new(Script::Finish {
        running: 0,
        terminal: RemoteStatus::Failed,
    });
    let service = build_service(test_config(), coord.clone(), backend);

    let id = service.submit_job(png(1), "broken.png").await.unwrap();
    service.dispatch_once().await;
    wait_terminal(&service, &[id]).await;

    // The worker writes a snapshot when it finishes.
    let session = service.recover_session("test-session").await.unwrap().unwrap();
    assert_eq!(session.jobs.len(), 1);
    assert_eq!(session.jobs[0].recovery, RecoveryState::Failed);
    assert!(session.jobs[0].job.error.is_some());
}

#[tokio::test]
async fn unknown_session_recovers_nothing() {
    let coord = ObservedCoordinator::new(2);
    let service = build_service(test_config(), coord, MockBackend::succeeding_after(0));

    assert!(service.recover_session("nobody").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_writes_final_snapshot() {
    let coord = ObservedCoordinator::new(2);
    let service = build_service(test_config(), coord.clone(), MockBackend::succeeding_after(0));

    let id = service.submit_job(png(1), "late.png").await.unwrap();
    assert!(service.recover_session("test-session").await.unwrap().is_none());

    service.shutdown(Duration::from_millis(10)).await;

    let session = service.recover_session("test-session").await.unwrap().unwrap();
    assert_eq!(session.jobs.len(), 1);
    assert_eq!(session.jobs[0].job.job_id, id);
    assert_eq!(session.jobs[0].recovery, RecoveryState::NeedsResubmission);
}

#[tokio::test(start_paused = true)]
async fn idle_live_session_stays_recoverable_past_ttl() {
    let coord = ObservedCoordinator::new(2);
    let config = PipelineConfig {
        snapshot_interval: Duration::from_secs(5),
        snapshot_ttl: Duration::from_secs(60),
        ..test_config()
    };
    let service = build_service(config, coord.clone(), MockBackend::succeeding_after(0));
    service.start();

    let id = service.submit_job(png(1), "idle.png").await.unwrap();
    wait_terminal(&service, &[id]).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(service.recover_session("test-session").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_secs(120)).await;
    let session = service
        .recover_session("test-session")
        .await
        .unwrap()
        .expect("live session snapshot must not expire");
    assert_eq!(session.jobs[0].job.job_id, id);
    assert_eq!(session.jobs[0].recovery, RecoveryState::Succeeded);

    service.shutdown(Duration::from_secs(1)).await;
}

