//! Shared fixtures for pipeline integration tests.
//!
//! [`MockBackend`] scripts the vendor workflow; [`ObservedCoordinator`]
//! wraps the in-memory coordinator and records what the pipeline did to
//! the shared store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use retouch_coord::{ClearedCounts, CoordConfig, CoordError, Coordinator, MemoryCoordinator};
use retouch_core::job::{JobDescriptor, JobPayload, JobStatus, NodeOverride};
use retouch_core::retry::BackoffPolicy;
use retouch_core::types::JobId;
use retouch_pipeline::{JobService, JobSnapshot, PipelineConfig};
use retouch_runninghub::{RemoteStatus, RunningHubApiError, WorkflowBackend};

pub const RESULT_BYTES: &[u8] = b"optimized-image";

/// Vendor rejection text that the default classifier treats as a rate limit.
pub const RATE_LIMIT_MSG: &str = "Too Many Requests";

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// How the scripted vendor answers.
#[derive(Debug, Clone)]
pub enum Script {
    /// `running` polls report RUNNING, then the task finishes with `terminal`.
    Finish { running: u32, terminal: RemoteStatus },
    /// Every upload is rejected with a rate-limit message.
    RateLimitedUpload,
    /// Every poll reports RUNNING.
    NeverFinish,
    /// The first poll never returns.
    HangOnPoll,
}

pub struct MockBackend {
    script: Script,
    next_task: AtomicU64,
    polls_by_task: Mutex<HashMap<String, u32>>,
    pub uploads: AtomicUsize,
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    pub poll_times: Mutex<Vec<Instant>>,
}

impl MockBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            next_task: AtomicU64::new(1),
            polls_by_task: Mutex::new(HashMap::new()),
            uploads: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            poll_times: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding_after(running: u32) -> Arc<Self> {
        Self::new(Script::Finish {
            running,
            terminal: RemoteStatus::Success,
        })
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowBackend for MockBackend {
    async fn upload(
        &self,
        _payload: &JobPayload,
        display_name: &str,
    ) -> Result<String, RunningHubApiError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if matches!(self.script, Script::RateLimitedUpload) {
            return Err(RunningHubApiError::Rejected {
                code: 1,
                msg: RATE_LIMIT_MSG.to_string(),
            });
        }
        Ok(format!("api/{display_name}"))
    }

    async fn submit(&self, node_overrides: &[NodeOverride]) -> Result<String, RunningHubApiError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        assert!(
            node_overrides.iter().any(|n| n.field_value.starts_with("api/")),
            "image node was not bound to the uploaded handle",
        );
        Ok(format!(
            "task-{}",
            self.next_task.fetch_add(1, Ordering::SeqCst)
        ))
    }

    async fn poll(&self, external_job_id: &str) -> Result<RemoteStatus, RunningHubApiError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.poll_times.lock().unwrap().push(Instant::now());
        let seen = {
            let mut polls = self.polls_by_task.lock().unwrap();
            let n = polls.entry(external_job_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if matches!(self.script, Script::HangOnPoll) {
            std::future::pending::<()>().await;
        }
        Ok(match &self.script {
            Script::Finish { running, terminal } if seen > *running => terminal.clone(),
            _ => RemoteStatus::Running,
        })
    }

    async fn fetch_output(&self, external_job_id: &str) -> Result<String, RunningHubApiError> {
        Ok(format!("https://cdn.example/{external_job_id}.png"))
    }

    async fn download(&self, _result_url: &str) -> Result<Vec<u8>, RunningHubApiError> {
        Ok(RESULT_BYTES.to_vec())
    }
}

// ---------------------------------------------------------------------------
// ObservedCoordinator
// ---------------------------------------------------------------------------

/// In-memory coordinator that records enqueues and peak admission, and can
/// be switched into an "unreachable" mode.
pub struct ObservedCoordinator {
    inner: MemoryCoordinator,
    pub enqueued: Mutex<Vec<JobDescriptor>>,
    peak_admitted: AtomicUsize,
    down: AtomicBool,
}

impl ObservedCoordinator {
    pub fn new(max_global_concurrent: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCoordinator::new(CoordConfig::new(max_global_concurrent)),
            enqueued: Mutex::new(Vec::new()),
            peak_admitted: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn peak_admitted(&self) -> usize {
        self.peak_admitted.load(Ordering::SeqCst)
    }

    /// `retry_count` of every descriptor pushed for `job_id`, in order.
    pub fn enqueued_retry_counts(&self, job_id: JobId) -> Vec<u32> {
        self.enqueued
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.job_id == job_id)
            .map(|d| d.retry_count)
            .collect()
    }

    fn check(&self) -> Result<(), CoordError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CoordError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for ObservedCoordinator {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), CoordError> {
        self.check()?;
        self.inner.enqueue(descriptor).await?;
        self.enqueued.lock().unwrap().push(descriptor.clone());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobDescriptor>, CoordError> {
        self.check()?;
        self.inner.dequeue().await
    }

    async fn try_acquire_slot(&self, job_id: JobId) -> Result<bool, CoordError> {
        self.check()?;
        let acquired = self.inner.try_acquire_slot(job_id).await?;
        let admitted = self.inner.count_admitted().await?;
        self.peak_admitted.fetch_max(admitted, Ordering::SeqCst);
        Ok(acquired)
    }

    async fn refresh_slot(&self, job_id: JobId) -> Result<bool, CoordError> {
        self.check()?;
        self.inner.refresh_slot(job_id).await
    }

    async fn release_slot(&self, job_id: JobId) -> Result<(), CoordError> {
        self.check()?;
        self.inner.release_slot(job_id).await
    }

    async fn count_queued(&self) -> Result<usize, CoordError> {
        self.check()?;
        self.inner.count_queued().await
    }

    async fn count_admitted(&self) -> Result<usize, CoordError> {
        self.check()?;
        self.inner.count_admitted().await
    }

    async fn clear_all(&self) -> Result<ClearedCounts, CoordError> {
        self.check()?;
        self.inner.clear_all().await
    }

    async fn put_snapshot(
        &self,
        session_id: &str,
        snapshot: &str,
        ttl: Duration,
    ) -> Result<(), CoordError> {
        self.check()?;
        self.inner.put_snapshot(session_id, snapshot, ttl).await
    }

    async fn get_snapshot(&self, session_id: &str) -> Result<Option<String>, CoordError> {
        self.check()?;
        self.inner.get_snapshot(session_id).await
    }

    async fn ping(&self) -> Result<(), CoordError> {
        self.check()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fast settings: 1s polls, 10 polls max, 10ms backoff unit.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        max_local_concurrent: 5,
        dispatch_interval: Duration::from_millis(100),
        poll_interval: Duration::from_secs(1),
        max_poll_count: 10,
        backoff: BackoffPolicy::with_unit(Duration::from_millis(10)),
        session_id: "test-session".to_string(),
        ..Default::default()
    }
}

pub fn build_service(
    config: PipelineConfig,
    coord: Arc<ObservedCoordinator>,
    backend: Arc<MockBackend>,
) -> Arc<JobService> {
    JobService::new(config, coord, backend)
}

pub fn png(byte: u8) -> JobPayload {
    JobPayload::new(vec![byte; 16], "image/png")
}

/// Sleep in small steps until every listed job is terminal.
///
/// Meant for paused-clock tests, where sleeping lets the runtime advance
/// time to the next timer.
pub async fn wait_terminal(service: &JobService, ids: &[JobId]) -> Vec<JobSnapshot> {
    for _ in 0..100_000 {
        let mut done = Vec::with_capacity(ids.len());
        for id in ids {
            let snapshot = service.get_job(*id).await.unwrap();
            if snapshot.status.is_terminal() {
                done.push(snapshot);
            }
        }
        if done.len() == ids.len() {
            return done;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("jobs did not finish: {ids:?}");
}

pub async fn status_of(service: &JobService, id: JobId) -> JobStatus {
    service.get_job(id).await.unwrap().status
}
