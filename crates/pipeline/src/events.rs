//! Job lifecycle events.
//!
//! Broadcast on a [`tokio::sync::broadcast`] channel so a UI replacement can
//! follow jobs without polling. Receivers that fall behind miss events;
//! [`crate::JobService::list_jobs`] is always the source of truth.

use serde::Serialize;

use retouch_core::job::JobStatus;
use retouch_core::types::JobId;

/// Broadcast channel capacity for job events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A change in a local job's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// The job moved to a new status.
    StatusChanged { job_id: JobId, status: JobStatus },

    /// Progress advanced (or was reset to 0 by a retry).
    Progress { job_id: JobId, progress: u8 },

    /// A rate-limited job is going back on the shared queue.
    Requeued {
        job_id: JobId,
        retry_count: u32,
        delay_ms: u64,
    },

    /// The job failed terminally.
    Failed { job_id: JobId, error: String },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::StatusChanged { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Requeued { job_id, .. }
            | JobEvent::Failed { job_id, .. } => *job_id,
        }
    }
}
