use std::time::Duration;

use retouch_core::config::{env_opt, env_or, env_string};
use retouch_core::error::CoreError;
use retouch_core::job::{validate_retry_budget, NodeOverride};
use retouch_core::retry::{BackoffPolicy, ErrorClassifier};

/// Vendor node that receives the uploaded image by default.
pub const DEFAULT_IMAGE_NODE_ID: &str = "38";

/// Field of the image node that receives the remote handle.
pub const IMAGE_FIELD_NAME: &str = "image";

/// Prompt nodes of the default retouch workflow.
pub const POSITIVE_PROMPT_NODE_ID: &str = "60";
pub const NEGATIVE_PROMPT_NODE_ID: &str = "4";
pub const PROMPT_FIELD_NAME: &str = "text";

pub const DEFAULT_POSITIVE_PROMPT: &str = "8k, high quality, high detail";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "色调艳丽,过曝,静态,细节模糊不清,字幕,风格,作品,画作,画面,静止,整体发灰,最差质量,低质量,JPEG压缩残留,丑陋的,残缺的,多余的手指,画得不好的手部,画得不好的脸部,畸形的,毁容的,形态畸形的肢体,手指融合,静止不动的画面,悲乱的背景,三条腿,背景人很多,倒着走";

/// Largest accepted `POLL_INTERVAL_SECS`.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);
/// Largest accepted `BACKOFF_UNIT_MS`.
pub const MAX_BACKOFF_UNIT: Duration = Duration::from_secs(600);
/// Largest accepted `SNAPSHOT_TTL_SECS` (30 days).
pub const MAX_SNAPSHOT_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Tunables for dispatching and executing jobs in one process.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Workers this process runs at once.
    pub max_local_concurrent: usize,
    pub dispatch_interval: Duration,
    pub poll_interval: Duration,
    /// Polls before a job times out; the hard timeout is
    /// `max_poll_count * poll_interval`.
    pub max_poll_count: u32,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub classifier: ErrorClassifier,
    /// Bounces of one foreign descriptor this process performs before
    /// dropping it. `None` bounces forever.
    pub max_bounces: Option<u32>,
    pub snapshot_interval: Duration,
    pub snapshot_ttl: Duration,
    /// Key under which this process's snapshots are written.
    pub session_id: String,
    pub image_node_id: String,
    /// Template copied for every submission.
    pub node_overrides: Vec<NodeOverride>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_local_concurrent: 3,
            dispatch_interval: Duration::from_millis(1000),
            poll_interval: Duration::from_secs(3),
            max_poll_count: 300,
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            classifier: ErrorClassifier::default(),
            max_bounces: None,
            snapshot_interval: Duration::from_secs(10),
            snapshot_ttl: Duration::from_secs(3600),
            session_id: uuid::Uuid::new_v4().to_string(),
            image_node_id: DEFAULT_IMAGE_NODE_ID.to_string(),
            node_overrides: default_node_overrides(DEFAULT_IMAGE_NODE_ID),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default            |
    /// |-----------------------------|--------------------|
    /// | `MAX_LOCAL_CONCURRENT`      | `3`                |
    /// | `DISPATCH_INTERVAL_MS`      | `1000`             |
    /// | `POLL_INTERVAL_SECS`        | `3`                |
    /// | `MAX_POLL_COUNT`            | `300`              |
    /// | `MAX_RETRIES`               | `3`                |
    /// | `BACKOFF_UNIT_MS`           | `1000`             |
    /// | `MAX_BOUNCES`               | unset (unbounded)  |
    /// | `SNAPSHOT_INTERVAL_SECS`    | `10`               |
    /// | `SNAPSHOT_TTL_SECS`         | `3600`             |
    /// | `SESSION_ID`                | random UUID        |
    /// | `RUNNINGHUB_IMAGE_NODE_ID`  | `38`               |
    /// | `RUNNINGHUB_NODE_OVERRIDES` | image + prompts    |
    pub fn from_env() -> Result<Self, CoreError> {
        let defaults = Self::default();

        let image_node_id = env_string("RUNNINGHUB_IMAGE_NODE_ID")
            .unwrap_or_else(|| DEFAULT_IMAGE_NODE_ID.to_string());
        let node_overrides = match env_string("RUNNINGHUB_NODE_OVERRIDES") {
            Some(raw) => parse_node_overrides(&raw)?,
            None => default_node_overrides(&image_node_id),
        };

        let config = Self {
            max_local_concurrent: env_or("MAX_LOCAL_CONCURRENT", defaults.max_local_concurrent)?,
            dispatch_interval: Duration::from_millis(env_or("DISPATCH_INTERVAL_MS", 1000)?),
            poll_interval: Duration::from_secs(env_or("POLL_INTERVAL_SECS", 3)?),
            max_poll_count: env_or("MAX_POLL_COUNT", defaults.max_poll_count)?,
            max_retries: env_or("MAX_RETRIES", defaults.max_retries)?,
            backoff: BackoffPolicy::with_unit(Duration::from_millis(env_or(
                "BACKOFF_UNIT_MS",
                1000,
            )?)),
            classifier: ErrorClassifier::default(),
            max_bounces: env_opt("MAX_BOUNCES")?,
            snapshot_interval: Duration::from_secs(env_or("SNAPSHOT_INTERVAL_SECS", 10)?),
            snapshot_ttl: Duration::from_secs(env_or("SNAPSHOT_TTL_SECS", 3600)?),
            session_id: env_string("SESSION_ID").unwrap_or(defaults.session_id),
            image_node_id,
            node_overrides,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_local_concurrent == 0 {
            return Err(CoreError::Validation(
                "MAX_LOCAL_CONCURRENT must be at least 1".into(),
            ));
        }
        if self.max_poll_count == 0 {
            return Err(CoreError::Validation("MAX_POLL_COUNT must be at least 1".into()));
        }
        if self.dispatch_interval.is_zero() || self.snapshot_interval.is_zero() {
            return Err(CoreError::Validation(
                "dispatch and snapshot intervals must be non-zero".into(),
            ));
        }
        if self.poll_interval.is_zero() || self.poll_interval > MAX_POLL_INTERVAL {
            return Err(CoreError::Validation(format!(
                "POLL_INTERVAL_SECS must be between 1 and {}",
                MAX_POLL_INTERVAL.as_secs()
            )));
        }
        if self.backoff.unit > MAX_BACKOFF_UNIT {
            return Err(CoreError::Validation(format!(
                "BACKOFF_UNIT_MS must be at most {}",
                MAX_BACKOFF_UNIT.as_millis()
            )));
        }
        if self.snapshot_ttl.is_zero() || self.snapshot_ttl > MAX_SNAPSHOT_TTL {
            return Err(CoreError::Validation(format!(
                "SNAPSHOT_TTL_SECS must be between 1 and {}",
                MAX_SNAPSHOT_TTL.as_secs()
            )));
        }
        validate_retry_budget(self.max_retries)?;
        if !self
            .node_overrides
            .iter()
            .any(|node| node.node_id == self.image_node_id)
        {
            return Err(CoreError::Validation(format!(
                "node overrides must include the image node {}",
                self.image_node_id
            )));
        }
        Ok(())
    }

    /// Upper bound on how long one job may poll.
    pub fn poll_timeout(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_poll_count)
    }
}

/// The override list used when none is configured: the image node plus the
/// workflow's positive and negative prompt nodes.
pub fn default_node_overrides(image_node_id: &str) -> Vec<NodeOverride> {
    vec![
        NodeOverride::new(image_node_id, IMAGE_FIELD_NAME, "placeholder.png"),
        NodeOverride::new(POSITIVE_PROMPT_NODE_ID, PROMPT_FIELD_NAME, DEFAULT_POSITIVE_PROMPT),
        NodeOverride::new(NEGATIVE_PROMPT_NODE_ID, PROMPT_FIELD_NAME, DEFAULT_NEGATIVE_PROMPT),
    ]
}

/// Parse a JSON array of `{nodeId, fieldName, fieldValue}`.
pub fn parse_node_overrides(raw: &str) -> Result<Vec<NodeOverride>, CoreError> {
    serde_json::from_str(raw)
        .map_err(|e| CoreError::Validation(format!("RUNNINGHUB_NODE_OVERRIDES is invalid: {e}")))
}
