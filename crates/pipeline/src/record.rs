//! Job records held by the process that created them.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use retouch_core::error::CoreError;
use retouch_core::job::{JobDescriptor, JobPayload, JobStatus};
use retouch_core::progress::{estimate_remaining, PROGRESS_COMPLETE};
use retouch_core::types::{JobId, Timestamp};

/// Prefix of the file name a result is offered under.
pub const RESULT_NAME_PREFIX: &str = "optimized_";

/// Live state of one job: descriptor, payload, and progress.
///
/// The payload is dropped once the job reaches a terminal status.
#[derive(Debug)]
pub struct JobRecord {
    pub descriptor: JobDescriptor,
    payload: Option<Arc<JobPayload>>,
    pub content_type: String,
    pub status: JobStatus,
    /// `0..=100`. Only moves forward, except for a reset on retry.
    pub progress: u8,
    pub external_job_id: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<Timestamp>,
    started: Option<Instant>,
    pub elapsed: Option<Duration>,
    result: Option<Arc<Vec<u8>>>,
}

impl JobRecord {
    /// A new record, not yet on the shared queue.
    pub fn new(descriptor: JobDescriptor, payload: JobPayload) -> Self {
        Self {
            descriptor,
            content_type: payload.content_type.clone(),
            payload: Some(Arc::new(payload)),
            status: JobStatus::PendingEnqueue,
            progress: 0,
            external_job_id: None,
            error: None,
            started_at: None,
            started: None,
            elapsed: None,
            result: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.descriptor.job_id
    }

    pub fn payload(&self) -> Option<Arc<JobPayload>> {
        self.payload.clone()
    }

    pub fn result(&self) -> Option<Arc<Vec<u8>>> {
        self.result.clone()
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn set_status(&mut self, to: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition(to) {
            return Err(CoreError::Conflict(format!(
                "job {} cannot move from {} to {}",
                self.job_id(),
                self.status,
                to
            )));
        }
        self.status = to;
        if to.is_terminal() {
            self.payload = None;
        }
        Ok(())
    }

    /// Raise progress to `value`. Returns whether it changed.
    pub fn advance_progress(&mut self, value: u8) -> bool {
        let value = value.min(PROGRESS_COMPLETE);
        if value > self.progress {
            self.progress = value;
            true
        } else {
            false
        }
    }

    /// Progress restarts from zero when a job goes back to the queue.
    pub fn reset_progress(&mut self) {
        self.progress = 0;
    }

    /// Record the start of an attempt.
    pub fn mark_started(&mut self) {
        self.started_at = Some(chrono::Utc::now());
        self.started = Some(Instant::now());
        self.elapsed = None;
    }

    /// Time since the current attempt started, or the final duration.
    pub fn elapsed_so_far(&self) -> Option<Duration> {
        self.elapsed.or_else(|| self.started.map(|s| s.elapsed()))
    }

    fn stop_clock(&mut self) {
        if let Some(started) = self.started {
            self.elapsed = Some(started.elapsed());
        }
    }

    /// Terminal success with the downloaded result.
    pub fn succeed(&mut self, result: Vec<u8>) -> Result<(), CoreError> {
        self.set_status(JobStatus::Succeeded)?;
        self.progress = PROGRESS_COMPLETE;
        self.result = Some(Arc::new(result));
        self.error = None;
        self.stop_clock();
        Ok(())
    }

    /// Terminal failure with an already bounded message.
    pub fn fail(&mut self, message: String) -> Result<(), CoreError> {
        self.set_status(JobStatus::Failed)?;
        self.error = Some(message);
        self.stop_clock();
        Ok(())
    }

    /// Download name of the result, e.g. `optimized_cat.png`.
    pub fn result_name(&self) -> String {
        format!("{RESULT_NAME_PREFIX}{}", self.descriptor.display_name)
    }

    /// Serializable view without payload or result bytes.
    pub fn snapshot(&self) -> JobSnapshot {
        let elapsed = self.elapsed_so_far();
        let remaining = if self.status.is_active() {
            elapsed.map(|e| estimate_remaining(e).as_secs())
        } else {
            None
        };

        JobSnapshot {
            job_id: self.job_id(),
            display_name: self.descriptor.display_name.clone(),
            created_at: self.descriptor.created_at,
            status: self.status,
            progress: self.progress,
            retry_count: self.descriptor.retry_count,
            max_retries: self.descriptor.max_retries,
            external_job_id: self.external_job_id.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            elapsed_ms: elapsed.map(|e| e.as_millis() as u64),
            remaining_secs: remaining,
            result_name: self.result.as_ref().map(|_| self.result_name()),
        }
    }
}

/// Point-in-time metadata of a job, as listed to callers and written to
/// session snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub display_name: String,
    pub created_at: Timestamp,
    pub status: JobStatus,
    pub progress: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub external_job_id: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<Timestamp>,
    pub elapsed_ms: Option<u64>,
    /// Rough time left, for running jobs only.
    pub remaining_secs: Option<u64>,
    /// Present once a result can be downloaded.
    pub result_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn record() -> JobRecord {
        let descriptor = JobDescriptor::new("cat.png", 3, "proc-a").unwrap();
        JobRecord::new(descriptor, JobPayload::new(vec![1, 2, 3], "image/png"))
    }

    #[test]
    fn new_record_is_pending_enqueue_with_payload() {
        let r = record();
        assert_eq!(r.status, JobStatus::PendingEnqueue);
        assert_eq!(r.progress, 0);
        assert_eq!(r.payload().unwrap().len(), 3);
    }

    #[test]
    fn progress_never_regresses() {
        let mut r = record();
        assert!(r.advance_progress(30));
        assert!(!r.advance_progress(20));
        assert_eq!(r.progress, 30);
        assert!(r.advance_progress(150));
        assert_eq!(r.progress, 100);
    }

    #[test]
    fn reset_progress_returns_to_zero() {
        let mut r = record();
        r.advance_progress(60);
        r.reset_progress();
        assert_eq!(r.progress, 0);
    }

    #[test]
    fn invalid_transition_is_conflict() {
        let mut r = record();
        assert_matches!(r.set_status(JobStatus::Polling), Err(CoreError::Conflict(_)));
        assert_eq!(r.status, JobStatus::PendingEnqueue);
    }

    #[test]
    fn terminal_status_drops_payload() {
        let mut r = record();
        r.set_status(JobStatus::Queued).unwrap();
        r.set_status(JobStatus::Dispatched).unwrap();
        r.set_status(JobStatus::Uploading).unwrap();
        r.fail("boom".into()).unwrap();
        assert!(r.payload().is_none());
        assert_eq!(r.snapshot().error.as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_records_result_and_elapsed() {
        let mut r = record();
        for status in [
            JobStatus::Queued,
            JobStatus::Dispatched,
            JobStatus::Uploading,
            JobStatus::Submitted,
            JobStatus::Polling,
        ] {
            r.set_status(status).unwrap();
        }
        r.mark_started();
        tokio::time::advance(Duration::from_secs(42)).await;
        r.succeed(vec![9, 9]).unwrap();

        let snap = r.snapshot();
        assert_eq!(snap.status, JobStatus::Succeeded);
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.elapsed_ms, Some(42_000));
        assert_eq!(snap.result_name.as_deref(), Some("optimized_cat.png"));
        assert_eq!(snap.remaining_secs, None);
    }

    #[tokio::test(start_paused = true)]
    async fn running_job_reports_remaining_estimate() {
        let mut r = record();
        r.set_status(JobStatus::Queued).unwrap();
        r.set_status(JobStatus::Dispatched).unwrap();
        r.set_status(JobStatus::Uploading).unwrap();
        r.mark_started();
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(r.snapshot().remaining_secs, Some(100));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = record().snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: JobSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
