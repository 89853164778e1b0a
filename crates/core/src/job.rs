//! Job descriptors, payloads, and the job status state machine.
//!
//! A [`JobDescriptor`] is the only part of a job that ever travels through
//! the shared store. The binary [`JobPayload`] deliberately does not
//! implement `Serialize`: it lives in the memory of the process that
//! created the job and nowhere else.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{new_job_id, JobId, Timestamp};

/// Upper bound accepted for a job's retry budget.
pub const MAX_RETRY_BUDGET: u32 = 10;

/// Maximum length of a display name (usually the uploaded file name).
const MAX_DISPLAY_NAME_LEN: usize = 255;

// ---------------------------------------------------------------------------
// JobDescriptor
// ---------------------------------------------------------------------------

/// Lightweight, payload-free reference to a unit of work.
///
/// Serialized as JSON onto the shared queue, so any process can read it,
/// but only the process named by `origin` holds the matching payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub job_id: JobId,
    pub display_name: String,
    pub created_at: Timestamp,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Identifier of the process that created the job (and owns its payload).
    #[serde(default)]
    pub origin: String,
}

impl JobDescriptor {
    /// Create a descriptor for a freshly submitted job.
    pub fn new(
        display_name: impl Into<String>,
        max_retries: u32,
        origin: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let display_name = display_name.into();
        validate_display_name(&display_name)?;
        validate_retry_budget(max_retries)?;

        Ok(Self {
            job_id: new_job_id(),
            display_name,
            created_at: chrono::Utc::now(),
            retry_count: 0,
            max_retries,
            origin: origin.into(),
        })
    }

    /// Whether another rate-limit retry is still within budget.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Encode for the shared queue.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a shared queue entry.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Validate a display name: non-empty, bounded, no control characters.
pub fn validate_display_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "Display name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Display name must not exceed {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(CoreError::Validation(
            "Display name must not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a retry budget against [`MAX_RETRY_BUDGET`].
pub fn validate_retry_budget(max_retries: u32) -> Result<(), CoreError> {
    if max_retries > MAX_RETRY_BUDGET {
        return Err(CoreError::Validation(format!(
            "max_retries must be at most {MAX_RETRY_BUDGET}, got {max_retries}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// JobPayload
// ---------------------------------------------------------------------------

/// Raw input bytes plus their content type.
///
/// Not serializable on purpose.
#[derive(Clone, PartialEq, Eq)]
pub struct JobPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl JobPayload {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for JobPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPayload")
            .field("len", &self.bytes.len())
            .field("content_type", &self.content_type)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// NodeOverride
// ---------------------------------------------------------------------------

/// One input override applied to the remote workflow at submission time.
///
/// Field names follow the vendor's camelCase wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOverride {
    pub node_id: String,
    pub field_name: String,
    pub field_value: String,
}

impl NodeOverride {
    pub fn new(
        node_id: impl Into<String>,
        field_name: impl Into<String>,
        field_value: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            field_name: field_name.into(),
            field_value: field_value.into(),
        }
    }
}

/// Copy `template` and point the image node at `remote_handle`.
///
/// The template itself is never modified, so concurrent submissions cannot
/// observe each other's handles.
pub fn bind_image_node(
    template: &[NodeOverride],
    image_node_id: &str,
    remote_handle: &str,
) -> Vec<NodeOverride> {
    template
        .iter()
        .cloned()
        .map(|mut node| {
            if node.node_id == image_node_id {
                node.field_value = remote_handle.to_string();
            }
            node
        })
        .collect()
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created locally, not yet on the shared queue (store unreachable).
    PendingEnqueue,
    Queued,
    Dispatched,
    Uploading,
    Submitted,
    Polling,
    WaitingRetry,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::PendingEnqueue => "PENDING_ENQUEUE",
            JobStatus::Queued => "QUEUED",
            JobStatus::Dispatched => "DISPATCHED",
            JobStatus::Uploading => "UPLOADING",
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Polling => "POLLING",
            JobStatus::WaitingRetry => "WAITING_RETRY",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// The job currently holds (or is about to release) an admission slot
    /// and occupies one of this process's worker places.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Dispatched
                | JobStatus::Uploading
                | JobStatus::Submitted
                | JobStatus::Polling
                | JobStatus::WaitingRetry
        )
    }

    /// Statuses reachable from `self`.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            PendingEnqueue => &[Queued, Failed],
            // Failed when an operator drains the shared queue under it.
            Queued => &[Dispatched, Failed],
            Dispatched => &[Uploading, Failed],
            Uploading => &[Submitted, WaitingRetry, Failed],
            Submitted => &[Polling, WaitingRetry, Failed],
            Polling => &[Succeeded, WaitingRetry, Failed],
            // Requeue may find the store unreachable and park the job locally.
            WaitingRetry => &[Queued, PendingEnqueue, Failed],
            Succeeded | Failed => &[],
        }
    }

    pub fn can_transition(&self, to: JobStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
