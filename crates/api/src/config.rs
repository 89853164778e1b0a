use retouch_core::config::{env_or, env_required, env_string, split_list};
use retouch_core::error::CoreError;
use retouch_runninghub::api::DEFAULT_BASE_URL;

/// Default multipart body limit: 20 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long running jobs get to finish on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Largest accepted request body (default: 20 MiB).
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    /// | `MAX_UPLOAD_BYTES`     | `20971520`                 |
    pub fn from_env() -> Result<Self, CoreError> {
        let cors_origins = split_list(
            &env_string("CORS_ORIGINS").unwrap_or_else(|| "http://localhost:5173".into()),
        );

        Ok(Self {
            host: env_string("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env_or("PORT", 3000)?,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30)?,
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

/// Connection settings for the RunningHub workflow API.
#[derive(Clone)]
pub struct VendorConfig {
    pub base_url: String,
    pub api_key: String,
    pub workflow_id: String,
}

impl VendorConfig {
    /// | Env Var                  | Default                     |
    /// |--------------------------|-----------------------------|
    /// | `RUNNINGHUB_BASE_URL`    | `https://www.runninghub.cn` |
    /// | `RUNNINGHUB_API_KEY`     | required                    |
    /// | `RUNNINGHUB_WORKFLOW_ID` | required                    |
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            base_url: env_string("RUNNINGHUB_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: env_required("RUNNINGHUB_API_KEY")?,
            workflow_id: env_required("RUNNINGHUB_WORKFLOW_ID")?,
        })
    }
}

// The API key must never end up in logs.
impl std::fmt::Debug for VendorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("workflow_id", &self.workflow_id)
            .finish()
    }
}
