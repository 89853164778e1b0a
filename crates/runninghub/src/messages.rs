//! RunningHub response envelopes and remote task status.
//!
//! Every endpoint answers with `{"code": <int>, "msg": <string>, "data": ...}`
//! where `code == 0` means success. The `data` shape depends on the call:
//!
//! | Endpoint                  | `data`                          |
//! |---------------------------|---------------------------------|
//! | `/task/openapi/upload`    | `{"fileName": "..."}`           |
//! | `/task/openapi/run`       | `{"taskId": "...", ...}`        |
//! | `/task/openapi/status`    | bare status string              |
//! | `/task/openapi/outputs`   | `[{"fileUrl": "...", ...}, ..]` |

use std::fmt;

use serde::Deserialize;

/// Generic `{code, msg, data}` response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    pub msg: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn message(&self) -> &str {
        self.msg.as_deref().unwrap_or("unknown error")
    }
}

/// `data` of a successful upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadData {
    /// Remote handle to reference the uploaded file in a workflow.
    pub file_name: String,
}

/// `data` of a successful run submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunData {
    pub task_id: TaskId,
}

/// Task ids arrive as either JSON strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Text(String),
    Number(i64),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Text(s) => f.write_str(s),
            TaskId::Number(n) => write!(f, "{n}"),
        }
    }
}

/// One element of the outputs list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputItem {
    pub file_url: String,
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Status of a remote task as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    Running,
    Success,
    Failed,
    /// Anything else, including a missing status. Treated as transient.
    Unknown(String),
}

impl RemoteStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => RemoteStatus::Queued,
            "RUNNING" => RemoteStatus::Running,
            "SUCCESS" => RemoteStatus::Success,
            "FAILED" => RemoteStatus::Failed,
            _ => RemoteStatus::Unknown(raw.to_string()),
        }
    }

    /// Interpret the `data` field of a status envelope.
    pub fn from_data(data: Option<&serde_json::Value>) -> Self {
        match data {
            Some(serde_json::Value::String(s)) => Self::parse(s),
            Some(other) => RemoteStatus::Unknown(other.to_string()),
            None => RemoteStatus::Unknown(String::new()),
        }
    }

    /// Whether the task is still in progress (keep polling).
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            RemoteStatus::Queued | RemoteStatus::Running | RemoteStatus::Unknown(_)
        )
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Queued => f.write_str("QUEUED"),
            RemoteStatus::Running => f.write_str("RUNNING"),
            RemoteStatus::Success => f.write_str("SUCCESS"),
            RemoteStatus::Failed => f.write_str("FAILED"),
            RemoteStatus::Unknown(raw) => write!(f, "UNKNOWN({raw})"),
        }
    }
}
