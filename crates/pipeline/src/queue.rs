//! Moving local jobs onto the shared queue.
//!
//! A job is put on the queue from three places: submission, the
//! dispatcher's flush of `PENDING_ENQUEUE` records, and a worker's retry.
//! [`JobQueue`] serializes them so a job is pushed at most once per
//! attempt, and pairs each push with the matching status change.

use std::sync::Arc;

use tokio::sync::Mutex;

use retouch_coord::{CoordError, Coordinator};
use retouch_core::job::{JobDescriptor, JobStatus};
use retouch_core::types::JobId;

use crate::registry::LocalJobs;

pub struct JobQueue {
    jobs: Arc<LocalJobs>,
    coord: Arc<dyn Coordinator>,
    gate: Mutex<()>,
}

impl JobQueue {
    pub fn new(jobs: Arc<LocalJobs>, coord: Arc<dyn Coordinator>) -> Self {
        Self {
            jobs,
            coord,
            gate: Mutex::new(()),
        }
    }

    /// Push a local job waiting to be queued and mark it `QUEUED`.
    ///
    /// Jobs in any other status are left alone. When the store is
    /// unreachable the job is parked in `PENDING_ENQUEUE` for the next
    /// flush and the store error is returned.
    pub async fn enqueue_local(&self, job_id: JobId) -> Result<(), CoordError> {
        let _guard = self.gate.lock().await;

        let Some((descriptor, status)) = self
            .jobs
            .inspect(job_id, |r| (r.descriptor.clone(), r.status))
            .await
        else {
            return Ok(());
        };
        if !matches!(status, JobStatus::PendingEnqueue | JobStatus::WaitingRetry) {
            return Ok(());
        }

        match self.coord.enqueue(&descriptor).await {
            Ok(()) => {
                self.set_status(job_id, JobStatus::Queued).await;
                tracing::debug!(
                    job_id = %job_id,
                    retry_count = descriptor.retry_count,
                    "Job pushed to shared queue",
                );
                Ok(())
            }
            Err(e) => {
                if status == JobStatus::WaitingRetry {
                    self.set_status(job_id, JobStatus::PendingEnqueue).await;
                }
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "Shared queue unavailable; job kept pending",
                );
                Err(e)
            }
        }
    }

    /// Retry every `PENDING_ENQUEUE` job. Returns how many were queued.
    pub async fn flush_pending(&self) -> usize {
        let mut flushed = 0;
        for descriptor in self.jobs.pending_enqueue().await {
            match self.enqueue_local(descriptor.job_id).await {
                Ok(()) => flushed += 1,
                // The store is down; the rest would fail the same way.
                Err(_) => break,
            }
        }
        flushed
    }

    /// Put a dequeued descriptor back at the tail, unchanged.
    pub async fn push_back(&self, descriptor: &JobDescriptor) -> Result<(), CoordError> {
        self.coord.enqueue(descriptor).await
    }

    async fn set_status(&self, job_id: JobId, status: JobStatus) {
        if let Err(e) = self.jobs.set_status(job_id, status).await {
            tracing::warn!(job_id = %job_id, error = %e, "Status change rejected");
        }
    }
}
