//! Per-job worker: drives one admitted job through the vendor workflow.
//!
//! ```text
//! DISPATCHED -> UPLOADING -> SUBMITTED -> POLLING -> SUCCEEDED
//!      \            \            \           \
//!       +------------+------------+-----------+--> FAILED
//!                    \            \           \
//!                     +------------+-----------+--> WAITING_RETRY -> QUEUED
//! ```
//!
//! Each external call classifies its own failure into a [`JobError`]. Only
//! rate-limit errors within the retry budget take the `WAITING_RETRY`
//! path; everything else is terminal. The worker holds an admission slot
//! for the whole attempt and refreshes it while waiting so the slot is not
//! evicted as stale.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use retouch_coord::Coordinator;
use retouch_core::error::{bounded_message, MAX_ERROR_MESSAGE_LEN};
use retouch_core::job::{bind_image_node, JobDescriptor, JobPayload, JobStatus};
use retouch_core::progress::{
    poll_progress, PROGRESS_COMPLETE, PROGRESS_FETCHING, PROGRESS_POLL_START, PROGRESS_SUBMITTED,
    PROGRESS_UPLOADING,
};
use retouch_core::retry::{decide, ErrorKind, RetryDecision};
use retouch_core::types::JobId;
use retouch_runninghub::{RemoteStatus, WorkflowBackend};

use crate::config::PipelineConfig;
use crate::error::{JobError, Stage};
use crate::events::JobEvent;
use crate::queue::JobQueue;
use crate::record::JobRecord;
use crate::registry::LocalJobs;
use crate::snapshot::SnapshotStore;

/// Longest a worker waits between slot refreshes during a retry backoff.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Everything a worker needs; cheap to clone into each spawned job.
#[derive(Clone)]
pub struct Worker {
    jobs: Arc<LocalJobs>,
    queue: Arc<JobQueue>,
    coord: Arc<dyn Coordinator>,
    backend: Arc<dyn WorkflowBackend>,
    snapshots: Arc<SnapshotStore>,
    config: Arc<PipelineConfig>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        jobs: Arc<LocalJobs>,
        queue: Arc<JobQueue>,
        coord: Arc<dyn Coordinator>,
        backend: Arc<dyn WorkflowBackend>,
        snapshots: Arc<SnapshotStore>,
        config: Arc<PipelineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            jobs,
            queue,
            coord,
            backend,
            snapshots,
            config,
            cancel,
        }
    }

    /// Run one attempt of a dispatched job to success, failure, or requeue.
    ///
    /// Never returns an error: every outcome is recorded on the job.
    pub async fn run(self, descriptor: JobDescriptor, payload: Arc<JobPayload>) {
        let job_id = descriptor.job_id;
        tracing::info!(
            job_id = %job_id,
            display_name = %descriptor.display_name,
            retry_count = descriptor.retry_count,
            "Worker started",
        );

        match self.execute(&descriptor, &payload).await {
            Ok(result) => self.complete(job_id, result).await,
            Err(err) if err.is_retryable() => {
                match decide(
                    ErrorKind::RateLimited,
                    descriptor.retry_count,
                    descriptor.max_retries,
                    &self.config.backoff,
                ) {
                    RetryDecision::Retry { retry_count, delay } => {
                        self.retry(job_id, retry_count, delay, &err).await
                    }
                    RetryDecision::Fail => self.fail(job_id, err).await,
                }
            }
            Err(err) => self.fail(job_id, err).await,
        }

        self.snapshots.persist_best_effort(&self.jobs).await;
    }

    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        payload: &JobPayload,
    ) -> Result<Vec<u8>, JobError> {
        let job_id = descriptor.job_id;
        let classifier = &self.config.classifier;

        self.jobs.update(job_id, JobRecord::mark_started).await;
        self.enter(job_id, JobStatus::Uploading, PROGRESS_UPLOADING).await;
        let handle = self
            .backend
            .upload(payload, &descriptor.display_name)
            .await
            .map_err(|e| JobError::classify(Stage::Upload, &e, classifier))?;
        tracing::debug!(job_id = %job_id, remote_handle = %handle, "Image uploaded");

        let overrides =
            bind_image_node(&self.config.node_overrides, &self.config.image_node_id, &handle);
        let task_id = self
            .backend
            .submit(&overrides)
            .await
            .map_err(|e| JobError::classify(Stage::Submit, &e, classifier))?;
        let external_id = task_id.clone();
        self.jobs
            .update(job_id, move |r| r.external_job_id = Some(external_id))
            .await;
        self.enter(job_id, JobStatus::Submitted, PROGRESS_SUBMITTED).await;
        tracing::info!(job_id = %job_id, task_id = %task_id, "Workflow submitted");

        self.enter(job_id, JobStatus::Polling, PROGRESS_POLL_START).await;
        self.poll_until_finished(job_id, &task_id).await?;

        let result_url = self
            .backend
            .fetch_output(&task_id)
            .await
            .map_err(|e| JobError::classify(Stage::Output, &e, classifier))?;
        self.jobs.advance_progress(job_id, PROGRESS_FETCHING).await;
        self.backend
            .download(&result_url)
            .await
            .map_err(|e| JobError::classify(Stage::Output, &e, classifier))
    }

    /// Poll until the remote task finishes, at most `max_poll_count` times.
    async fn poll_until_finished(&self, job_id: JobId, task_id: &str) -> Result<(), JobError> {
        let max = self.config.max_poll_count;

        for poll in 1..=max {
            self.sleep_or_cancel(self.config.poll_interval).await?;
            self.heartbeat(job_id).await;

            match self.backend.poll(task_id).await {
                Ok(RemoteStatus::Success) => return Ok(()),
                Ok(RemoteStatus::Failed) => {
                    return Err(JobError::RemoteProcessing(task_id.to_string()))
                }
                Ok(status) => {
                    tracing::debug!(job_id = %job_id, poll, status = %status, "Task still running");
                }
                Err(e) => match JobError::classify(Stage::Poll, &e, &self.config.classifier) {
                    err @ JobError::RateLimited(_) => return Err(err),
                    err => {
                        tracing::warn!(job_id = %job_id, poll, error = %err, "Poll failed; continuing");
                    }
                },
            }

            self.jobs.advance_progress(job_id, poll_progress(poll, max)).await;
        }

        Err(JobError::Timeout {
            polls: max,
            waited: self.config.poll_timeout(),
        })
    }

    async fn complete(&self, job_id: JobId, result: Vec<u8>) {
        let size = result.len();
        self.release(job_id).await;

        match self.jobs.try_update(job_id, |r| r.succeed(result)).await {
            Ok(()) => {
                self.jobs.emit(JobEvent::Progress {
                    job_id,
                    progress: PROGRESS_COMPLETE,
                });
                self.jobs.emit(JobEvent::StatusChanged {
                    job_id,
                    status: JobStatus::Succeeded,
                });
                let elapsed_ms = self
                    .jobs
                    .inspect(job_id, |r| r.elapsed.map(|e| e.as_millis() as u64))
                    .await
                    .flatten();
                tracing::info!(job_id = %job_id, bytes = size, elapsed_ms, "Job succeeded");
            }
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Could not record success"),
        }
    }

    async fn fail(&self, job_id: JobId, err: JobError) {
        let message = bounded_message(&err.to_string(), MAX_ERROR_MESSAGE_LEN);
        self.release(job_id).await;

        let recorded = message.clone();
        match self.jobs.try_update(job_id, move |r| r.fail(recorded)).await {
            Ok(()) => {
                self.jobs.emit(JobEvent::StatusChanged {
                    job_id,
                    status: JobStatus::Failed,
                });
                self.jobs.emit(JobEvent::Failed {
                    job_id,
                    error: message.clone(),
                });
            }
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Could not record failure"),
        }
        tracing::error!(job_id = %job_id, error = %message, "Job failed");
    }

    /// Back off, then hand the slot back and put the job on the queue again.
    async fn retry(&self, job_id: JobId, retry_count: u32, delay: Duration, err: &JobError) {
        self.jobs
            .update(job_id, |r| {
                r.descriptor.retry_count = retry_count;
                r.reset_progress();
            })
            .await;
        if let Err(e) = self.jobs.set_status(job_id, JobStatus::WaitingRetry).await {
            tracing::warn!(job_id = %job_id, error = %e, "Status change rejected");
        }
        self.jobs.emit(JobEvent::Progress { job_id, progress: 0 });
        self.jobs.emit(JobEvent::Requeued {
            job_id,
            retry_count,
            delay_ms: delay.as_millis() as u64,
        });
        tracing::info!(
            job_id = %job_id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Rate limited; requeueing after backoff",
        );

        if let Err(cancelled) = self.hold_slot_for(job_id, delay).await {
            self.fail(job_id, cancelled).await;
            return;
        }

        self.release(job_id).await;
        // On store failure the job is parked in PENDING_ENQUEUE and flushed
        // by the dispatcher.
        let _ = self.queue.enqueue_local(job_id).await;
    }

    /// Move to `status` and raise progress to at least `progress`.
    async fn enter(&self, job_id: JobId, status: JobStatus, progress: u8) {
        if let Err(e) = self.jobs.set_status(job_id, status).await {
            tracing::warn!(job_id = %job_id, error = %e, "Status change rejected");
        }
        self.jobs.advance_progress(job_id, progress).await;
    }

    /// Sleep for `total`, refreshing the admission slot along the way.
    async fn hold_slot_for(&self, job_id: JobId, total: Duration) -> Result<(), JobError> {
        let deadline = Instant::now() + total;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            self.sleep_or_cancel((deadline - now).min(HEARTBEAT_INTERVAL))
                .await?;
            self.heartbeat(job_id).await;
        }
    }

    async fn sleep_or_cancel(&self, duration: Duration) -> Result<(), JobError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(JobError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn heartbeat(&self, job_id: JobId) {
        match self.coord.refresh_slot(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %job_id, "Admission slot no longer held; continuing")
            }
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Slot refresh failed"),
        }
    }

    async fn release(&self, job_id: JobId) {
        if let Err(e) = self.coord.release_slot(job_id).await {
            // The slot ages out through staleness eviction.
            tracing::warn!(job_id = %job_id, error = %e, "Slot release failed");
        }
    }
}
