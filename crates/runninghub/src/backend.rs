use async_trait::async_trait;
use retouch_core::job::{JobPayload, NodeOverride};

use crate::api::{RunningHubApi, RunningHubApiError};
use crate::messages::RemoteStatus;

/// The external asynchronous workflow a job is driven through.
///
/// Workers depend on this trait rather than on [`RunningHubApi`] so the
/// state machine can be exercised against a scripted backend.
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    /// Upload the input image, returning a remote handle.
    async fn upload(
        &self,
        payload: &JobPayload,
        display_name: &str,
    ) -> Result<String, RunningHubApiError>;

    /// Start the workflow, returning the external task id.
    async fn submit(&self, node_overrides: &[NodeOverride]) -> Result<String, RunningHubApiError>;

    async fn poll(&self, external_job_id: &str) -> Result<RemoteStatus, RunningHubApiError>;

    /// URL of the first result of a finished task.
    async fn fetch_output(&self, external_job_id: &str) -> Result<String, RunningHubApiError>;

    async fn download(&self, result_url: &str) -> Result<Vec<u8>, RunningHubApiError>;
}

#[async_trait]
impl WorkflowBackend for RunningHubApi {
    async fn upload(
        &self,
        payload: &JobPayload,
        display_name: &str,
    ) -> Result<String, RunningHubApiError> {
        RunningHubApi::upload(self, payload, display_name).await
    }

    async fn submit(&self, node_overrides: &[NodeOverride]) -> Result<String, RunningHubApiError> {
        RunningHubApi::submit(self, node_overrides).await
    }

    async fn poll(&self, external_job_id: &str) -> Result<RemoteStatus, RunningHubApiError> {
        RunningHubApi::poll(self, external_job_id).await
    }

    async fn fetch_output(&self, external_job_id: &str) -> Result<String, RunningHubApiError> {
        RunningHubApi::fetch_output(self, external_job_id).await
    }

    async fn download(&self, result_url: &str) -> Result<Vec<u8>, RunningHubApiError> {
        RunningHubApi::download(self, result_url).await
    }
}
