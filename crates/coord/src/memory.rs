//! In-process coordinator.
//!
//! Used when no shared store is configured (single-process mode) and as the
//! store in tests. Entries are kept serialized so the queue round-trips
//! descriptors exactly the way the shared store does. Time comes from
//! `tokio::time`, so paused-clock tests control slot staleness and TTLs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use retouch_core::job::JobDescriptor;
use retouch_core::types::JobId;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{ClearedCounts, CoordConfig, CoordError, Coordinator};

#[derive(Debug, Default)]
struct MemoryState {
    queue: VecDeque<String>,
    /// `job_id -> claim_time`.
    slots: HashMap<JobId, Instant>,
    /// `key -> (value, expires_at)`.
    snapshots: HashMap<String, (String, Instant)>,
}

/// [`Coordinator`] backed by a mutex-guarded in-memory state.
#[derive(Debug)]
pub struct MemoryCoordinator {
    config: CoordConfig,
    state: Mutex<MemoryState>,
}

impl MemoryCoordinator {
    pub fn new(config: CoordConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn config(&self) -> &CoordConfig {
        &self.config
    }

    fn is_live(&self, claimed_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(claimed_at) <= self.config.slot_stale_after
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn enqueue(&self, descriptor: &JobDescriptor) -> Result<(), CoordError> {
        let encoded = descriptor.to_json()?;
        self.state.lock().await.queue.push_back(encoded);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<JobDescriptor>, CoordError> {
        let raw = self.state.lock().await.queue.pop_front();
        match raw {
            Some(raw) => Ok(Some(JobDescriptor::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_acquire_slot(&self, job_id: JobId) -> Result<bool, CoordError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let stale_after = self.config.slot_stale_after;
        state
            .slots
            .retain(|_, claimed_at| now.saturating_duration_since(*claimed_at) <= stale_after);

        if let Some(claimed_at) = state.slots.get_mut(&job_id) {
            *claimed_at = now;
            return Ok(true);
        }
        if state.slots.len() < self.config.max_global_concurrent {
            state.slots.insert(job_id, now);
            return Ok(true);
        }
        Ok(false)
    }

    async fn refresh_slot(&self, job_id: JobId) -> Result<bool, CoordError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.slots.get_mut(&job_id) {
            Some(claimed_at) if self.is_live(*claimed_at, now) => {
                *claimed_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_slot(&self, job_id: JobId) -> Result<(), CoordError> {
        self.state.lock().await.slots.remove(&job_id);
        Ok(())
    }

    async fn count_queued(&self) -> Result<usize, CoordError> {
        Ok(self.state.lock().await.queue.len())
    }

    async fn count_admitted(&self) -> Result<usize, CoordError> {
        let now = Instant::now();
        let state = self.state.lock().await;
        Ok(state
            .slots
            .values()
            .filter(|claimed_at| self.is_live(**claimed_at, now))
            .count())
    }

    async fn clear_all(&self) -> Result<ClearedCounts, CoordError> {
        let mut state = self.state.lock().await;
        let cleared = ClearedCounts {
            queued: state.queue.len(),
            admitted: state.slots.len(),
        };
        state.queue.clear();
        state.slots.clear();
        Ok(cleared)
    }

    async fn put_snapshot(
        &self,
        session_id: &str,
        snapshot: &str,
        ttl: Duration,
    ) -> Result<(), CoordError> {
        let key = self.config.snapshot_key(session_id);
        let expires_at = Instant::now() + ttl;
        self.state
            .lock()
            .await
            .snapshots
            .insert(key, (snapshot.to_string(), expires_at));
        Ok(())
    }

    async fn get_snapshot(&self, session_id: &str) -> Result<Option<String>, CoordError> {
        let key = self.config.snapshot_key(session_id);
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.snapshots.get(&key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                state.snapshots.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), CoordError> {
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.config.max_global_concurrent
    }
}
