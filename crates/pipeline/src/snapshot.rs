//! Best-effort session snapshots.
//!
//! Job metadata (never payload or result bytes) is written under a
//! per-session key with a TTL, so a reloaded front end can show the last
//! known state of its jobs. Recovered jobs are never resumed: anything that
//! had not finished is reported as needing re-submission.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use retouch_coord::{CoordError, Coordinator};
use retouch_core::job::JobStatus;
use retouch_core::types::Timestamp;

use crate::record::JobSnapshot;
use crate::registry::LocalJobs;

/// Everything written for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub saved_at: Timestamp,
    pub jobs: Vec<JobSnapshot>,
}

/// What a recovered job can still offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Succeeded,
    Failed,
    /// The payload died with its process; the user must submit again.
    NeedsResubmission,
}

impl RecoveryState {
    pub fn from_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Succeeded => RecoveryState::Succeeded,
            JobStatus::Failed => RecoveryState::Failed,
            _ => RecoveryState::NeedsResubmission,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredJob {
    #[serde(flatten)]
    pub job: JobSnapshot,
    pub recovery: RecoveryState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredSession {
    pub session_id: String,
    pub saved_at: Timestamp,
    pub jobs: Vec<RecoveredJob>,
}

impl From<SessionSnapshot> for RecoveredSession {
    fn from(snapshot: SessionSnapshot) -> Self {
        let jobs = snapshot
            .jobs
            .into_iter()
            .map(|job| RecoveredJob {
                recovery: RecoveryState::from_status(job.status),
                job,
            })
            .collect();
        Self {
            session_id: snapshot.session_id,
            saved_at: snapshot.saved_at,
            jobs,
        }
    }
}

/// Writes and reads session snapshots through the coordinator.
pub struct SnapshotStore {
    coord: Arc<dyn Coordinator>,
    session_id: String,
    ttl: Duration,
}

impl SnapshotStore {
    pub fn new(coord: Arc<dyn Coordinator>, session_id: String, ttl: Duration) -> Self {
        Self {
            coord,
            session_id,
            ttl,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Write the current state of `jobs` for this session.
    pub async fn persist(&self, jobs: &LocalJobs) -> Result<(), CoordError> {
        let snapshot = SessionSnapshot {
            session_id: self.session_id.clone(),
            saved_at: chrono::Utc::now(),
            jobs: jobs.list().await,
        };
        let encoded = serde_json::to_string(&snapshot)?;
        self.coord
            .put_snapshot(&self.session_id, &encoded, self.ttl)
            .await
    }

    /// Persist, logging instead of failing.
    pub async fn persist_best_effort(&self, jobs: &LocalJobs) {
        if let Err(e) = self.persist(jobs).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Snapshot write failed");
        }
    }

    /// Load the last snapshot of any session.
    pub async fn load(&self, session_id: &str) -> Result<Option<SessionSnapshot>, CoordError> {
        match self.coord.get_snapshot(session_id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a snapshot every `interval` while `jobs` keeps changing, until
    /// cancelled. An unchanged snapshot is rewritten once half its TTL has
    /// passed so a live session never expires.
    pub async fn run(&self, jobs: Arc<LocalJobs>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let refresh_after = self.ttl / 2;
        let mut written: Option<(u64, Instant)> = None;
        tracing::info!(
            session_id = %self.session_id,
            interval_ms = interval.as_millis() as u64,
            "Snapshot writer started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Snapshot writer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let version = jobs.version();
                    if let Some((written_version, written_at)) = written {
                        if written_version == version && written_at.elapsed() < refresh_after {
                            continue;
                        }
                    }
                    match self.persist(&jobs).await {
                        Ok(()) => written = Some((version, Instant::now())),
                        Err(e) => tracing::warn!(error = %e, "Snapshot write failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use retouch_coord::{CoordConfig, MemoryCoordinator};
    use retouch_core::job::{JobDescriptor, JobPayload};
    use tokio::sync::broadcast;

    use super::*;
    use crate::record::JobRecord;

    fn store(coord: Arc<dyn Coordinator>) -> SnapshotStore {
        SnapshotStore::new(coord, "session-1".into(), Duration::from_secs(3600))
    }

    async fn jobs_with(statuses: &[JobStatus]) -> LocalJobs {
        let (tx, _) = broadcast::channel(16);
        let jobs = LocalJobs::new(tx);
        for (i, target) in statuses.iter().enumerate() {
            let d = JobDescriptor::new(format!("{i}.png"), 3, "p").unwrap();
            let id = d.job_id;
            jobs.insert(JobRecord::new(d, JobPayload::new(vec![1], "image/png")))
                .await;
            let path: &[JobStatus] = match target {
                JobStatus::PendingEnqueue => &[],
                JobStatus::Queued => &[JobStatus::Queued],
                JobStatus::Failed => &[JobStatus::Failed],
                JobStatus::Polling => &[
                    JobStatus::Queued,
                    JobStatus::Dispatched,
                    JobStatus::Uploading,
                    JobStatus::Submitted,
                    JobStatus::Polling,
                ],
                other => panic!("unsupported target {other}"),
            };
            for s in path {
                jobs.set_status(id, *s).await.unwrap();
            }
        }
        jobs
    }

    #[test]
    fn recovery_state_by_status() {
        assert_eq!(RecoveryState::from_status(JobStatus::Succeeded), RecoveryState::Succeeded);
        assert_eq!(RecoveryState::from_status(JobStatus::Failed), RecoveryState::Failed);
        for s in [JobStatus::PendingEnqueue, JobStatus::Queued, JobStatus::Polling, JobStatus::WaitingRetry] {
            assert_eq!(RecoveryState::from_status(s), RecoveryState::NeedsResubmission);
        }
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let coord: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new(CoordConfig::new(1)));
        let store = store(Arc::clone(&coord));
        let jobs = jobs_with(&[JobStatus::Queued, JobStatus::Failed]).await;

        store.persist(&jobs).await.unwrap();
        let loaded = store.load("session-1").await.unwrap().unwrap();

        assert_eq!(loaded.session_id, "session-1");
        assert_eq!(loaded.jobs, jobs.list().await);
        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_never_contains_payload_bytes() {
        let coord: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new(CoordConfig::new(1)));
        let store = store(Arc::clone(&coord));
        let jobs = jobs_with(&[JobStatus::Polling]).await;
        store.persist(&jobs).await.unwrap();

        let raw = coord.get_snapshot("session-1").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let job = &value["jobs"][0];
        assert!(job.get("payload").is_none());
        assert!(job.get("bytes").is_none());
    }

    #[tokio::test]
    async fn unfinished_jobs_recover_as_needing_resubmission() {
        let coord: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new(CoordConfig::new(1)));
        let store = store(Arc::clone(&coord));
        let jobs = jobs_with(&[JobStatus::Polling, JobStatus::Failed, JobStatus::PendingEnqueue]).await;
        store.persist(&jobs).await.unwrap();

        let recovered = RecoveredSession::from(store.load("session-1").await.unwrap().unwrap());
        let states: Vec<_> = recovered.jobs.iter().map(|j| j.recovery).collect();
        assert_eq!(
            states,
            [
                RecoveryState::NeedsResubmission,
                RecoveryState::Failed,
                RecoveryState::NeedsResubmission
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_writes_only_when_jobs_change() {
        let coord: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new(CoordConfig::new(1)));
        let store = Arc::new(store(Arc::clone(&coord)));
        let jobs = Arc::new(jobs_with(&[JobStatus::Queued]).await);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let store = Arc::clone(&store);
            let jobs = Arc::clone(&jobs);
            let cancel = cancel.clone();
            async move { store.run(jobs, Duration::from_secs(10), cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = store.load("session-1").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        let unchanged = store.load("session-1").await.unwrap().unwrap();
        assert_eq!(unchanged.saved_at, first.saved_at);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_snapshot_is_refreshed_before_it_expires() {
        let coord: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new(CoordConfig::new(1)));
        let store = Arc::new(SnapshotStore::new(
            Arc::clone(&coord),
            "session-1".into(),
            Duration::from_secs(60),
        ));
        let jobs = Arc::new(jobs_with(&[JobStatus::Failed]).await);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let store = Arc::clone(&store);
            let jobs = Arc::clone(&jobs);
            let cancel = cancel.clone();
            async move { store.run(jobs, Duration::from_secs(5), cancel).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = store.load("session-1").await.unwrap().unwrap();

        // Well past the TTL with no job changes.
        tokio::time::sleep(Duration::from_secs(180)).await;
        let refreshed = store.load("session-1").await.unwrap().unwrap();
        assert_eq!(refreshed.jobs, first.jobs);

        cancel.cancel();
        handle.await.unwrap();
    }
}
