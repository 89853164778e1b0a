use std::time::Duration;

use retouch_core::retry::ErrorClassifier;
use retouch_runninghub::RunningHubApiError;

/// Why a job attempt stopped.
///
/// Only [`JobError::RateLimited`] leads to a retry; every other variant is
/// terminal. [`JobError::PollTransient`] never leaves the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Submit failed: {0}")]
    Submit(String),

    #[error("Status poll failed: {0}")]
    PollTransient(String),

    #[error("Remote processing failed for task {0}")]
    RemoteProcessing(String),

    #[error("Timed out after {polls} polls ({}s)", .waited.as_secs())]
    Timeout { polls: u32, waited: Duration },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Result retrieval failed: {0}")]
    Output(String),

    #[error("Stopped by shutdown")]
    Cancelled,
}

/// The external call an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Submit,
    Poll,
    Output,
}

impl JobError {
    /// Classify a vendor error raised at `stage`.
    pub fn classify(stage: Stage, err: &RunningHubApiError, classifier: &ErrorClassifier) -> Self {
        let text = err.to_string();
        if classifier.is_rate_limited(&text) {
            return JobError::RateLimited(text);
        }
        match stage {
            Stage::Upload => JobError::Upload(text),
            Stage::Submit => JobError::Submit(text),
            Stage::Poll => JobError::PollTransient(text),
            Stage::Output => JobError::Output(text),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::RateLimited(_))
    }
}
