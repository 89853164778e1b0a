//! Redis-backed coordinator for multi-process deployments.
//!
//! Layout under `{prefix}`:
//!
//! | Key                        | Type   | Contents                               |
//! |----------------------------|--------|----------------------------------------|
//! | `{prefix}:queue`           | list   | JSON job descriptors, FIFO             |
//! | `{prefix}:slots`           | zset   | `job_id` scored by claim time (unix ms)|
//! | `{prefix}:snapshot:{sid}`  | string | session snapshot JSON, with `EX` TTL   |
//!
//! Acquire, refresh and clear run as Lua scripts so each is one atomic step
//! on the server.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::FromRedisValue;
use retouch_core::job::JobDescriptor;
use retouch_core::types::JobId;
use tokio::sync::Mutex;

use crate::{ClearedCounts, CoordConfig, CoordError, Coordinator};

/// Upper bound on establishing a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on a single command round trip.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// KEYS[1] slots; ARGV: stale cutoff ms, capacity, job id, now ms.
const ACQUIRE_SLOT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
if redis.call('ZSCORE', KEYS[1], ARGV[3]) then
  redis.call('ZADD', KEYS[1], ARGV[4], ARGV[3])
  return 1
end
if redis.call('ZCARD', KEYS[1]) < tonumber(ARGV[2]) then
  redis.call('ZADD', KEYS[1], ARGV[4], ARGV[3])
  return 1
end
return 0
"#;

/// KEYS[1] slots; ARGV: stale cutoff ms, job id, now ms.
const REFRESH_SLOT_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[2])
if score and tonumber(score) >= tonumber(ARGV[1]) then
  redis.call('ZADD', KEYS[1], ARGV[3], ARGV[2])
  return 1
end
return 0
"#;

/// KEYS[1] queue, KEYS[2] slots.
const CLEAR_ALL_SCRIPT: &str = r#"
local queued = redis.call('LLEN', KEYS[1])
local admitted = redis.call('ZCARD', KEYS[2])
redis.call('DEL', KEYS[1], KEYS[2])
return {queued, admitted}
"#;

/// [`Coordinator`] over a Redis (or Valkey) server.
#[derive(Clone)]
pub struct RedisCoordinator {
    client: redis::Client,
    config: CoordConfig,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisCoordinator {
    /// Create a coordinator. The connection is opened lazily.
    pub fn new(redis_url: &str, config: CoordConfig) -> Result<Self, CoordError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            config,
            connection: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &CoordConfig {
        &self.config
    }

    fn stale_cutoff_ms(&self) -> i64 {
        now_unix_ms() - self.config.slot_stale_after.as_millis() as i64
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CoordError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CoordError::Unavailable("connect timed out".to_string()))??;
        tracing::debug!("Connected to shared store");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.connection.lock().await = None;
    }

    /// Run a command, reconnecting and retrying once when `retry` is set.
    ///
    /// Non-idempotent commands (queue push/pop) pass `retry = false`.
    async fn run_command<T, F>(
        &self,
        operation: &'static str,
        retry: bool,
        build: F,
    ) -> Result<T, CoordError>
    where
        T: FromRedisValue + Send,
        F: Fn() -> redis::Cmd,
    {
        let attempts = if retry { 2 } else { 1 };
        let mut last_err = None;

        for attempt in 0..attempts {
            let mut conn = self.connection().await?;
            let cmd = build();
            let result = tokio::time::timeout(COMMAND_TIMEOUT, cmd.query_async::<T>(&mut conn)).await;
            let err = match result {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        tracing::debug!(operation, "Shared store command succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => CoordError::from(err),
                Err(_) => CoordError::Unavailable(format!("{operation} timed out")),
            };
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                error = %err,
                "Shared store command failed; reconnecting",
            );
            self.reset_connection().await;
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| CoordError::Unavailable(format!("{operation} failed"))))
    }
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), CoordError> {
        let encoded = descriptor.to_json()?;
        let key = self.config.queue_key();
        self.run_command::<i64, _>("enqueue", false, || {
            let mut cmd = redis::cmd("RPUSH");
            cmd.arg(&key).arg(&encoded);
            cmd
        })
        .await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobDescriptor>, CoordError> {
        let key = self.config.queue_key();
        let raw: Option<String> = self
            .run_command("dequeue", false, || {
                let mut cmd = redis::cmd("LPOP");
                cmd.arg(&key);
                cmd
            })
            .await?;
        match raw {
            Some(raw) => Ok(Some(JobDescriptor::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_acquire_slot(&self, job_id: JobId) -> Result<bool, CoordError> {
        let key = self.config.slots_key();
        let member = job_id.to_string();
        let cutoff = self.stale_cutoff_ms();
        let now = now_unix_ms();
        let capacity = self.config.max_global_concurrent;
        let granted: i64 = self
            .run_command("try_acquire_slot", true, || {
                let mut cmd = redis::cmd("EVAL");
                cmd.arg(ACQUIRE_SLOT_SCRIPT)
                    .arg(1)
                    .arg(&key)
                    .arg(cutoff)
                    .arg(capacity)
                    .arg(&member)
                    .arg(now);
                cmd
            })
            .await?;
        Ok(granted == 1)
    }

    async fn refresh_slot(&self, job_id: JobId) -> Result<bool, CoordError> {
        let key = self.config.slots_key();
        let member = job_id.to_string();
        let cutoff = self.stale_cutoff_ms();
        let now = now_unix_ms();
        let refreshed: i64 = self
            .run_command("refresh_slot", true, || {
                let mut cmd = redis::cmd("EVAL");
                cmd.arg(REFRESH_SLOT_SCRIPT)
                    .arg(1)
                    .arg(&key)
                    .arg(cutoff)
                    .arg(&member)
                    .arg(now);
                cmd
            })
            .await?;
        Ok(refreshed == 1)
    }

    async fn release_slot(&self, job_id: JobId) -> Result<(), CoordError> {
        let key = self.config.slots_key();
        let member = job_id.to_string();
        self.run_command::<i64, _>("release_slot", true, || {
            let mut cmd = redis::cmd("ZREM");
            cmd.arg(&key).arg(&member);
            cmd
        })
        .await?;
        Ok(())
    }

    async fn count_queued(&self) -> Result<usize, CoordError> {
        let key = self.config.queue_key();
        self.run_command("count_queued", true, || {
            let mut cmd = redis::cmd("LLEN");
            cmd.arg(&key);
            cmd
        })
        .await
    }

    async fn count_admitted(&self) -> Result<usize, CoordError> {
        let key = self.config.slots_key();
        let cutoff = self.stale_cutoff_ms();
        self.run_command("count_admitted", true, || {
            let mut cmd = redis::cmd("ZCOUNT");
            cmd.arg(&key).arg(cutoff).arg("+inf");
            cmd
        })
        .await
    }

    async fn clear_all(&self) -> Result<ClearedCounts, CoordError> {
        let queue_key = self.config.queue_key();
        let slots_key = self.config.slots_key();
        let (queued, admitted): (usize, usize) = self
            .run_command("clear_all", true, || {
                let mut cmd = redis::cmd("EVAL");
                cmd.arg(CLEAR_ALL_SCRIPT)
                    .arg(2)
                    .arg(&queue_key)
                    .arg(&slots_key);
                cmd
            })
            .await?;
        Ok(ClearedCounts { queued, admitted })
    }

    async fn put_snapshot(
        &self,
        session_id: &str,
        snapshot: &str,
        ttl: Duration,
    ) -> Result<(), CoordError> {
        let key = self.config.snapshot_key(session_id);
        let ttl_secs = ttl.as_secs().max(1);
        self.run_command::<(), _>("put_snapshot", true, || {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(snapshot).arg("EX").arg(ttl_secs);
            cmd
        })
        .await
    }

    async fn get_snapshot(&self, session_id: &str) -> Result<Option<String>, CoordError> {
        let key = self.config.snapshot_key(session_id);
        self.run_command("get_snapshot", true, || {
            let mut cmd = redis::cmd("GET");
            cmd.arg(&key);
            cmd
        })
        .await
    }

    async fn ping(&self) -> Result<(), CoordError> {
        let pong: String = self
            .run_command("ping", true, || redis::cmd("PING"))
            .await?;
        tracing::trace!(reply = %pong, "Shared store ping");
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.config.max_global_concurrent
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
