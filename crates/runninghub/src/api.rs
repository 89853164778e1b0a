//! REST API client for the RunningHub task endpoints.
//!
//! Wraps the five calls a retouch job makes (upload, run, status, outputs,
//! and the final result download) using [`reqwest`]. Every call carries its
//! own timeout so a stalled remote side cannot hold a worker forever.

use std::time::Duration;

use retouch_core::job::{JobPayload, NodeOverride};
use serde::de::DeserializeOwned;

use crate::messages::{ApiEnvelope, OutputItem, RemoteStatus, RunData, UploadData};

/// Default vendor base URL.
pub const DEFAULT_BASE_URL: &str = "https://www.runninghub.cn";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const OUTPUTS_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for one RunningHub account and workflow.
#[derive(Clone)]
pub struct RunningHubApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    workflow_id: String,
}

/// Errors from the RunningHub REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum RunningHubApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// RunningHub returned a non-2xx status code.
    #[error("RunningHub API error (HTTP {status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The envelope carried a non-zero `code`.
    #[error("RunningHub rejected the request (code {code}): {msg}")]
    Rejected { code: i64, msg: String },

    /// A successful envelope without the expected `data`.
    #[error("RunningHub response missing {0}")]
    MissingData(&'static str),
}

impl RunningHubApi {
    /// Create a new API client.
    ///
    /// * `base_url` - e.g. `https://www.runninghub.cn` (no trailing slash).
    pub fn new(base_url: String, api_key: String, workflow_id: String) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key, workflow_id)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        workflow_id: String,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            workflow_id,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Upload an image. Returns the remote handle (`fileName`).
    ///
    /// Sends a multipart `POST /task/openapi/upload`.
    pub async fn upload(
        &self,
        payload: &JobPayload,
        display_name: &str,
    ) -> Result<String, RunningHubApiError> {
        let part = reqwest::multipart::Part::bytes(payload.bytes.clone())
            .file_name(display_name.to_string())
            .mime_str(&payload.content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("apiKey", self.api_key.clone())
            .text("fileType", "image");

        let response = self
            .client
            .post(self.url("/task/openapi/upload"))
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;

        let data: UploadData = Self::parse_envelope(response, "upload fileName").await?;
        Ok(data.file_name)
    }

    /// Start the workflow with the given node overrides. Returns the task id.
    ///
    /// Sends `POST /task/openapi/run`.
    pub async fn submit(&self, node_overrides: &[NodeOverride]) -> Result<String, RunningHubApiError> {
        let body = serde_json::json!({
            "apiKey": self.api_key,
            "webappId": self.workflow_id,
            "nodeInfoList": node_overrides,
        });

        let response = self
            .client
            .post(self.url("/task/openapi/run"))
            .json(&body)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await?;

        let data: RunData = Self::parse_envelope(response, "run taskId").await?;
        Ok(data.task_id.to_string())
    }

    /// Query the status of a task.
    ///
    /// Sends `POST /task/openapi/status`.
    pub async fn poll(&self, task_id: &str) -> Result<RemoteStatus, RunningHubApiError> {
        let response = self
            .client
            .post(self.url("/task/openapi/status"))
            .json(&self.task_body(task_id))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;

        let envelope: ApiEnvelope<serde_json::Value> = Self::parse_response(response).await?;
        if !envelope.is_success() {
            return Err(Self::rejected(&envelope));
        }
        Ok(RemoteStatus::from_data(envelope.data.as_ref()))
    }

    /// Return the URL of the first output of a finished task.
    ///
    /// Sends `POST /task/openapi/outputs`.
    pub async fn fetch_output(&self, task_id: &str) -> Result<String, RunningHubApiError> {
        let response = self
            .client
            .post(self.url("/task/openapi/outputs"))
            .json(&self.task_body(task_id))
            .timeout(OUTPUTS_TIMEOUT)
            .send()
            .await?;

        let items: Vec<OutputItem> = Self::parse_envelope(response, "outputs list").await?;
        items
            .into_iter()
            .next()
            .map(|item| item.file_url)
            .ok_or(RunningHubApiError::MissingData("output fileUrl"))
    }

    /// Download the bytes behind a result URL.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, RunningHubApiError> {
        let response = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn task_body(&self, task_id: &str) -> serde_json::Value {
        serde_json::json!({
            "apiKey": self.api_key,
            "taskId": task_id,
        })
    }

    fn rejected<T>(envelope: &ApiEnvelope<T>) -> RunningHubApiError {
        RunningHubApiError::Rejected {
            code: envelope.code,
            msg: envelope.message().to_string(),
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`RunningHubApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RunningHubApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RunningHubApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RunningHubApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Parse an envelope and unwrap its `data`, mapping a non-zero `code`
    /// to [`RunningHubApiError::Rejected`].
    async fn parse_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
        what: &'static str,
    ) -> Result<T, RunningHubApiError> {
        let envelope: ApiEnvelope<T> = Self::parse_response(response).await?;
        if !envelope.is_success() {
            return Err(Self::rejected(&envelope));
        }
        envelope.data.ok_or(RunningHubApiError::MissingData(what))
    }
}
