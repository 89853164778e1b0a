//! The local job table.
//!
//! [`LocalJobs`] owns every [`JobRecord`] created by this process, in
//! submission order. All status changes go through it so lifecycle events
//! are broadcast in one place and snapshot writers can tell when something
//! changed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};

use retouch_core::error::CoreError;
use retouch_core::job::{JobDescriptor, JobPayload, JobStatus};
use retouch_core::types::JobId;

use crate::events::JobEvent;
use crate::record::{JobRecord, JobSnapshot};

/// Whether a dequeued descriptor can run here.
#[derive(Debug)]
pub enum Dispatchable {
    /// Local, queued, and payload present.
    Ready(Arc<JobPayload>),
    /// No local record holds this job.
    NotLocal,
    /// Local, but not waiting to run (duplicate or stale queue entry).
    NotQueued(JobStatus),
}

/// A downloadable job result.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Arc<Vec<u8>>,
}

/// Local per-status counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LocalCounts {
    /// Waiting for a slot (including not yet on the shared queue).
    pub queued: usize,
    /// Holding a slot or waiting out a retry backoff.
    pub processing: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// Records of jobs owned by this process.
pub struct LocalJobs {
    records: RwLock<IndexMap<JobId, JobRecord>>,
    event_tx: broadcast::Sender<JobEvent>,
    version: AtomicU64,
}

impl LocalJobs {
    pub fn new(event_tx: broadcast::Sender<JobEvent>) -> Self {
        Self {
            records: RwLock::new(IndexMap::new()),
            event_tx,
            version: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Monotonic change counter, bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub async fn insert(&self, record: JobRecord) {
        let job_id = record.job_id();
        let status = record.status;
        self.records.write().await.insert(job_id, record);
        self.touch();
        self.emit(JobEvent::StatusChanged { job_id, status });
    }

    pub async fn get(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.records.read().await.get(&job_id).map(JobRecord::snapshot)
    }

    /// Snapshots of all records in submission order.
    pub async fn list(&self) -> Vec<JobSnapshot> {
        self.records
            .read()
            .await
            .values()
            .map(JobRecord::snapshot)
            .collect()
    }

    pub async fn dispatchable(&self, job_id: JobId) -> Dispatchable {
        let records = self.records.read().await;
        match records.get(&job_id) {
            None => Dispatchable::NotLocal,
            Some(record) if record.status != JobStatus::Queued => {
                Dispatchable::NotQueued(record.status)
            }
            Some(record) => match record.payload() {
                Some(payload) => Dispatchable::Ready(payload),
                None => Dispatchable::NotLocal,
            },
        }
    }

    /// Move a job to `status`, broadcasting the change.
    pub async fn set_status(&self, job_id: JobId, status: JobStatus) -> Result<(), CoreError> {
        self.try_update(job_id, |record| record.set_status(status))
            .await?;
        self.emit(JobEvent::StatusChanged { job_id, status });
        Ok(())
    }

    /// Raise a job's progress, broadcasting if it moved.
    pub async fn advance_progress(&self, job_id: JobId, progress: u8) {
        let changed = self
            .update(job_id, |record| {
                record.advance_progress(progress).then_some(record.progress)
            })
            .await
            .flatten();
        if let Some(progress) = changed {
            self.emit(JobEvent::Progress { job_id, progress });
        }
    }

    /// Read from a record without marking the table changed.
    pub async fn inspect<R>(&self, job_id: JobId, f: impl FnOnce(&JobRecord) -> R) -> Option<R> {
        self.records.read().await.get(&job_id).map(f)
    }

    /// Apply `f` to a record. Returns `None` if the job is unknown.
    pub async fn update<R>(&self, job_id: JobId, f: impl FnOnce(&mut JobRecord) -> R) -> Option<R> {
        let result = self.records.write().await.get_mut(&job_id).map(f);
        if result.is_some() {
            self.touch();
        }
        result
    }

    /// Apply a fallible `f`, mapping an unknown job to `NotFound`.
    pub async fn try_update<R>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut JobRecord) -> Result<R, CoreError>,
    ) -> Result<R, CoreError> {
        self.update(job_id, f).await.unwrap_or_else(|| {
            Err(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            })
        })
    }

    /// Descriptors of jobs that could not be put on the shared queue yet.
    pub async fn pending_enqueue(&self) -> Vec<JobDescriptor> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status == JobStatus::PendingEnqueue)
            .map(|r| r.descriptor.clone())
            .collect()
    }

    pub async fn result(&self, job_id: JobId) -> Result<JobResult, CoreError> {
        let records = self.records.read().await;
        let record = records.get(&job_id).ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: job_id.to_string(),
        })?;
        let bytes = record.result().ok_or_else(|| {
            CoreError::Conflict(format!("job {job_id} has no result (status {})", record.status))
        })?;
        Ok(JobResult {
            file_name: record.result_name(),
            content_type: record.content_type.clone(),
            bytes,
        })
    }

    pub async fn counts(&self) -> LocalCounts {
        let records = self.records.read().await;
        let mut counts = LocalCounts {
            total: records.len(),
            ..Default::default()
        };
        for record in records.values() {
            match record.status {
                JobStatus::PendingEnqueue | JobStatus::Queued => counts.queued += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::Failed => counts.failed += 1,
                _ => counts.processing += 1,
            }
        }
        counts
    }

    /// Fail every `QUEUED` job with `message`, dropping its payload.
    /// Returns the ids that changed.
    pub async fn fail_queued(&self, message: &str) -> Vec<JobId> {
        let mut records = self.records.write().await;
        let mut failed = Vec::new();
        for (job_id, record) in records.iter_mut() {
            if record.status == JobStatus::Queued && record.fail(message.to_string()).is_ok() {
                failed.push(*job_id);
            }
        }
        drop(records);

        if !failed.is_empty() {
            self.touch();
        }
        for job_id in &failed {
            self.emit(JobEvent::StatusChanged {
                job_id: *job_id,
                status: JobStatus::Failed,
            });
            self.emit(JobEvent::Failed {
                job_id: *job_id,
                error: message.to_string(),
            });
        }
        failed
    }

    /// Drop every record that is not currently running. Returns how many.
    ///
    /// Running jobs keep their records so their workers can finish; queue
    /// entries of dropped jobs are discarded when next dequeued here.
    pub async fn clear_inactive(&self) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.status.is_active());
        let removed = before - records.len();
        drop(records);
        if removed > 0 {
            self.touch();
        }
        removed
    }

    pub fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    fn touch(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}
