//! [`JobService`]: the interface front ends use to submit and follow jobs.
//!
//! A service owns this process's local job table and hosts two background
//! tasks once [`JobService::start`] is called: the dispatcher loop and the
//! periodic snapshot writer. Reads (`list_jobs`, `get_job`, ...) never wait
//! on the vendor API.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use retouch_coord::{ClearedCounts, CoordError, Coordinator};
use retouch_core::error::CoreError;
use retouch_core::job::{JobDescriptor, JobPayload};
use retouch_core::types::JobId;
use retouch_runninghub::WorkflowBackend;

use crate::config::PipelineConfig;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::events::{JobEvent, EVENT_CHANNEL_CAPACITY};
use crate::queue::JobQueue;
use crate::record::{JobRecord, JobSnapshot};
use crate::registry::{JobResult, LocalCounts, LocalJobs};
use crate::snapshot::{RecoveredSession, SnapshotStore};
use crate::worker::Worker;

/// How long shutdown waits for cancelled tasks to exit.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Error recorded on local jobs whose queue entries were cleared.
pub const CLEARED_BY_OPERATOR: &str = "Cleared by operator";

/// Counters for the queue overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub local: LocalCounts,
    /// Entries on the shared queue; `None` if the store is unreachable.
    pub shared_queued: Option<usize>,
    /// Live admission slots cluster-wide; `None` if the store is unreachable.
    pub shared_admitted: Option<usize>,
    pub running_here: usize,
    pub max_global_concurrent: usize,
    pub max_local_concurrent: usize,
}

/// Job submission, tracking, and background execution for one process.
pub struct JobService {
    config: Arc<PipelineConfig>,
    instance_id: String,
    jobs: Arc<LocalJobs>,
    queue: Arc<JobQueue>,
    coord: Arc<dyn Coordinator>,
    snapshots: Arc<SnapshotStore>,
    dispatcher: Arc<Dispatcher>,
    workers: TaskTracker,
    background: TaskTracker,
    cancel: CancellationToken,
}

impl JobService {
    /// Wire up a service. Nothing runs until [`JobService::start`].
    pub fn new(
        config: PipelineConfig,
        coord: Arc<dyn Coordinator>,
        backend: Arc<dyn WorkflowBackend>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let instance_id = uuid::Uuid::new_v4().to_string();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let jobs = Arc::new(LocalJobs::new(event_tx));
        let queue = Arc::new(JobQueue::new(Arc::clone(&jobs), Arc::clone(&coord)));
        let snapshots = Arc::new(SnapshotStore::new(
            Arc::clone(&coord),
            config.session_id.clone(),
            config.snapshot_ttl,
        ));
        let cancel = CancellationToken::new();
        let workers = TaskTracker::new();

        let worker = Worker::new(
            Arc::clone(&jobs),
            Arc::clone(&queue),
            Arc::clone(&coord),
            backend,
            Arc::clone(&snapshots),
            Arc::clone(&config),
            cancel.child_token(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&jobs),
            Arc::clone(&queue),
            Arc::clone(&coord),
            worker,
            workers.clone(),
            Arc::clone(&config),
            instance_id.clone(),
        ));

        Arc::new(Self {
            config,
            instance_id,
            jobs,
            queue,
            coord,
            snapshots,
            dispatcher,
            workers,
            background: TaskTracker::new(),
            cancel,
        })
    }

    /// Spawn the dispatcher and snapshot loops.
    pub fn start(self: &Arc<Self>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let cancel = self.cancel.clone();
        self.background
            .spawn(async move { dispatcher.run(cancel).await });

        let snapshots = Arc::clone(&self.snapshots);
        let jobs = Arc::clone(&self.jobs);
        let interval = self.config.snapshot_interval;
        let cancel = self.cancel.clone();
        self.background
            .spawn(async move { snapshots.run(jobs, interval, cancel).await });

        tracing::info!(
            instance_id = %self.instance_id,
            session_id = %self.config.session_id,
            "Job service started",
        );
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.jobs.subscribe()
    }

    /// Create a job for `payload` and put it on the shared queue.
    ///
    /// If the store is unreachable the job is still accepted and stays
    /// `PENDING_ENQUEUE` until a dispatcher tick can push it.
    pub async fn submit_job(
        &self,
        payload: JobPayload,
        display_name: &str,
    ) -> Result<JobId, CoreError> {
        if payload.is_empty() {
            return Err(CoreError::Validation("payload must not be empty".into()));
        }
        let descriptor = JobDescriptor::new(
            display_name,
            self.config.max_retries,
            self.instance_id.clone(),
        )?;
        let job_id = descriptor.job_id;

        self.jobs.insert(JobRecord::new(descriptor, payload)).await;
        // A store failure leaves the job PENDING_ENQUEUE; already logged.
        let _ = self.queue.enqueue_local(job_id).await;

        tracing::info!(job_id = %job_id, display_name, "Job submitted");
        Ok(job_id)
    }

    /// Snapshots of this process's jobs, in submission order.
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.jobs.list().await
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<JobSnapshot, CoreError> {
        self.jobs.get(job_id).await.ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })
    }

    /// Result bytes of a succeeded job.
    pub async fn job_result(&self, job_id: JobId) -> Result<JobResult, CoreError> {
        self.jobs.result(job_id).await
    }

    pub async fn queue_stats(&self) -> QueueStats {
        QueueStats {
            local: self.jobs.counts().await,
            shared_queued: self.coord.count_queued().await.ok(),
            shared_admitted: self.coord.count_admitted().await.ok(),
            running_here: self.dispatcher.local_running(),
            max_global_concurrent: self.coord.capacity(),
            max_local_concurrent: self.config.max_local_concurrent,
        }
    }

    /// Forget local jobs that are not running. Returns how many.
    pub async fn clear_local(&self) -> usize {
        let removed = self.jobs.clear_inactive().await;
        tracing::info!(removed, "Cleared local jobs");
        removed
    }

    /// Drain the shared queue and admission set for every process.
    ///
    /// This process's `QUEUED` jobs lost their queue entries and are failed.
    /// Other processes' queued jobs stay as they are until those processes
    /// clear them.
    pub async fn clear_global(&self) -> Result<ClearedCounts, CoordError> {
        let cleared = self.coord.clear_all().await?;
        let failed = self.jobs.fail_queued(CLEARED_BY_OPERATOR).await;
        tracing::warn!(
            queued = cleared.queued,
            admitted = cleared.admitted,
            local_failed = failed.len(),
            "Cleared shared queue and admission set",
        );
        Ok(cleared)
    }

    /// Last snapshot of `session_id`, with each job's recovery state.
    pub async fn recover_session(
        &self,
        session_id: &str,
    ) -> Result<Option<RecoveredSession>, CoordError> {
        Ok(self
            .snapshots
            .load(session_id)
            .await?
            .map(RecoveredSession::from))
    }

    /// Run one dispatch cycle now, outside the background loop.
    pub async fn dispatch_once(&self) -> DispatchReport {
        self.dispatcher.tick().await
    }

    /// Write a snapshot of the local jobs now.
    pub async fn persist_snapshot(&self) -> Result<(), CoordError> {
        self.snapshots.persist(&self.jobs).await
    }

    pub async fn store_healthy(&self) -> bool {
        self.coord.ping().await.is_ok()
    }

    /// Stop background loops, give running workers up to `grace` to finish,
    /// then write a final snapshot.
    pub async fn shutdown(&self, grace: Duration) {
        tracing::info!("Shutting down job service");
        self.background.close();
        self.workers.close();

        // Let workers run to completion first; they stop early when cancelled.
        if tokio::time::timeout(grace, self.workers.wait()).await.is_err() {
            tracing::warn!(
                running = self.workers.len(),
                "Workers still running after grace period; cancelling",
            );
        }
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.workers.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                running = self.workers.len(),
                "Workers did not stop after cancellation",
            );
        }
        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.background.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                running = self.background.len(),
                "Background loops did not stop after cancellation",
            );
        }

        self.snapshots.persist_best_effort(&self.jobs).await;
        tracing::info!("Job service shut down complete");
    }
}
