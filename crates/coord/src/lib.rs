//! Shared coordination client for the `retouch` dispatcher.
//!
//! Independent front-end processes coordinate only through a shared store:
//!
//! - a FIFO **queue** of serialized [`JobDescriptor`]s,
//! - an **admission set** of `job_id -> claim_time` entries acting as a
//!   distributed counting semaphore of size `max_global_concurrent`,
//! - string keys with a TTL holding per-session metadata snapshots.
//!
//! Every mutation is a single atomic store operation. Entries in the
//! admission set whose claim time is older than `slot_stale_after` are
//! excluded from live counts and evicted by the next acquire, which is how
//! slots held by crashed processes come back.
//!
//! Two implementations are provided: [`RedisCoordinator`] for multi-process
//! deployments and [`MemoryCoordinator`] for single-process mode and tests.

use std::time::Duration;

use async_trait::async_trait;
use retouch_core::config::{env_or, env_string};
use retouch_core::error::CoreError;
use retouch_core::job::JobDescriptor;
use retouch_core::types::JobId;

pub mod error;
pub mod memory;
pub mod redis_store;

pub use error::CoordError;
pub use memory::MemoryCoordinator;
pub use redis_store::RedisCoordinator;

/// Default key namespace in the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "retouch";

/// Default age after which an admission entry no longer counts.
pub const DEFAULT_SLOT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Settings shared by all coordinator implementations.
#[derive(Debug, Clone)]
pub struct CoordConfig {
    pub key_prefix: String,
    /// Size of the cluster-wide admission set.
    pub max_global_concurrent: usize,
    pub slot_stale_after: Duration,
}

impl CoordConfig {
    pub fn new(max_global_concurrent: usize) -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_global_concurrent,
            slot_stale_after: DEFAULT_SLOT_STALE_AFTER,
        }
    }

    /// Load coordinator settings from the environment.
    ///
    /// | Env Var                 | Default   |
    /// |-------------------------|-----------|
    /// | `COORD_KEY_PREFIX`      | `retouch` |
    /// | `MAX_GLOBAL_CONCURRENT` | `3`       |
    /// | `SLOT_STALE_AFTER_SECS` | `300`     |
    pub fn from_env() -> Result<Self, CoreError> {
        let max_global_concurrent: usize = env_or("MAX_GLOBAL_CONCURRENT", 3)?;
        if max_global_concurrent == 0 {
            return Err(CoreError::Validation(
                "MAX_GLOBAL_CONCURRENT must be at least 1".into(),
            ));
        }
        let stale_secs: u64 = env_or("SLOT_STALE_AFTER_SECS", DEFAULT_SLOT_STALE_AFTER.as_secs())?;

        Ok(Self {
            key_prefix: env_string("COORD_KEY_PREFIX").unwrap_or_else(|| DEFAULT_KEY_PREFIX.into()),
            max_global_concurrent,
            slot_stale_after: Duration::from_secs(stale_secs),
        })
    }

    pub fn queue_key(&self) -> String {
        format!("{}:queue", self.key_prefix)
    }

    pub fn slots_key(&self) -> String {
        format!("{}:slots", self.key_prefix)
    }

    pub fn snapshot_key(&self, session_id: &str) -> String {
        format!("{}:snapshot:{}", self.key_prefix, session_id)
    }
}

/// What [`Coordinator::clear_all`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearedCounts {
    pub queued: usize,
    pub admitted: usize,
}

/// Atomic primitives over the shared store.
///
/// Every method is a single store round trip. Implementations report
/// connectivity problems as [`CoordError::Unavailable`]; callers treat that
/// as "nothing to do this tick" and never fail a job because of it.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Push a descriptor onto the tail of the shared queue.
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), CoordError>;

    /// Non-blocking pop from the head of the shared queue.
    ///
    /// An entry that cannot be decoded is removed and reported as
    /// [`CoordError::Codec`].
    async fn dequeue(&self) -> Result<Option<JobDescriptor>, CoordError>;

    /// Atomically evict stale entries, then claim a slot for `job_id` if the
    /// live count is below capacity. Re-acquiring a held slot refreshes it.
    async fn try_acquire_slot(&self, job_id: JobId) -> Result<bool, CoordError>;

    /// Bump the claim time of a held slot. Returns `false` if the slot is no
    /// longer held (released, cleared, or evicted as stale).
    async fn refresh_slot(&self, job_id: JobId) -> Result<bool, CoordError>;

    /// Release a slot. Idempotent.
    async fn release_slot(&self, job_id: JobId) -> Result<(), CoordError>;

    async fn count_queued(&self) -> Result<usize, CoordError>;

    /// Number of admission entries that are not stale.
    async fn count_admitted(&self) -> Result<usize, CoordError>;

    /// Drain the shared queue and the admission set. Operator action only.
    async fn clear_all(&self) -> Result<ClearedCounts, CoordError>;

    /// Store a session snapshot, replacing any previous one, with a TTL.
    async fn put_snapshot(
        &self,
        session_id: &str,
        snapshot: &str,
        ttl: Duration,
    ) -> Result<(), CoordError>;

    async fn get_snapshot(&self, session_id: &str) -> Result<Option<String>, CoordError>;

    /// Liveness check.
    async fn ping(&self) -> Result<(), CoordError>;

    /// The configured `max_global_concurrent`.
    fn capacity(&self) -> usize;
}
