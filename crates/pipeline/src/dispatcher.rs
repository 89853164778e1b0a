//! Background job dispatcher.
//!
//! Ticks every `dispatch_interval`, samples free capacity (cluster-wide
//! admission slots and local worker slots), and moves that many jobs from
//! the shared queue into workers. A tick never blocks on anything but the
//! store round trips, and a store that cannot be reached makes the tick a
//! no-op.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use retouch_coord::{CoordError, Coordinator};
use retouch_core::job::{JobDescriptor, JobStatus};
use retouch_core::types::JobId;

use crate::config::PipelineConfig;
use crate::queue::JobQueue;
use crate::registry::{Dispatchable, LocalJobs};
use crate::worker::Worker;

/// What one dispatch cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// `PENDING_ENQUEUE` jobs pushed to the shared queue.
    pub flushed: usize,
    /// Capacity sampled at the start of the cycle.
    pub available: usize,
    /// Workers started.
    pub started: usize,
    /// Foreign descriptors put back at the tail.
    pub bounced: usize,
    /// Descriptors dropped (own job without payload, stale duplicate, or
    /// bounce cap reached).
    pub discarded: usize,
    /// The store could not be reached.
    pub store_unavailable: bool,
}

/// Per-process dispatch loop.
pub struct Dispatcher {
    jobs: Arc<LocalJobs>,
    queue: Arc<JobQueue>,
    coord: Arc<dyn Coordinator>,
    worker: Worker,
    workers: TaskTracker,
    config: Arc<PipelineConfig>,
    /// Identifier stamped on descriptors created by this process.
    origin: String,
    bounces: Mutex<HashMap<JobId, u32>>,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<LocalJobs>,
        queue: Arc<JobQueue>,
        coord: Arc<dyn Coordinator>,
        worker: Worker,
        workers: TaskTracker,
        config: Arc<PipelineConfig>,
        origin: String,
    ) -> Self {
        Self {
            jobs,
            queue,
            coord,
            worker,
            workers,
            config,
            origin,
            bounces: Mutex::new(HashMap::new()),
        }
    }

    /// Workers currently running in this process.
    pub fn local_running(&self) -> usize {
        self.workers.len()
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.dispatch_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            dispatch_interval_ms = self.config.dispatch_interval.as_millis() as u64,
            max_local_concurrent = self.config.max_local_concurrent,
            max_global_concurrent = self.coord.capacity(),
            origin = %self.origin,
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.started > 0 || report.bounced > 0 || report.discarded > 0 {
                        tracing::debug!(?report, "Dispatch cycle");
                    }
                }
            }
        }
    }

    /// One dispatch cycle.
    pub async fn tick(&self) -> DispatchReport {
        let mut report = DispatchReport {
            flushed: self.queue.flush_pending().await,
            ..Default::default()
        };

        let admitted = match self.coord.count_admitted().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Shared store unavailable; skipping dispatch");
                report.store_unavailable = true;
                return report;
            }
        };
        let global_free = self.coord.capacity().saturating_sub(admitted);
        let local_free = self
            .config
            .max_local_concurrent
            .saturating_sub(self.local_running());
        report.available = global_free.min(local_free);

        for _ in 0..report.available {
            let descriptor = match self.coord.dequeue().await {
                Ok(Some(d)) => d,
                Ok(None) => break,
                Err(CoordError::Codec(e)) => {
                    tracing::warn!(error = %e, "Dropped undecodable queue entry");
                    report.discarded += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Shared store unavailable; stopping dispatch");
                    report.store_unavailable = true;
                    break;
                }
            };

            let job_id = descriptor.job_id;
            let payload = match self.jobs.dispatchable(job_id).await {
                Dispatchable::Ready(payload) => payload,
                Dispatchable::NotLocal => {
                    self.handle_not_local(descriptor, &mut report).await;
                    continue;
                }
                // Popped before the record caught up with its push.
                Dispatchable::NotQueued(JobStatus::PendingEnqueue | JobStatus::WaitingRetry) => {
                    self.push_back(&descriptor).await;
                    continue;
                }
                Dispatchable::NotQueued(status) => {
                    tracing::debug!(job_id = %job_id, status = %status, "Dropped stale queue entry");
                    report.discarded += 1;
                    continue;
                }
            };

            match self.coord.try_acquire_slot(job_id).await {
                Ok(true) => {}
                Ok(false) => {
                    self.push_back(&descriptor).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Slot acquire failed");
                    self.push_back(&descriptor).await;
                    report.store_unavailable = true;
                    break;
                }
            }

            if let Err(e) = self.jobs.set_status(job_id, JobStatus::Dispatched).await {
                tracing::warn!(job_id = %job_id, error = %e, "Could not mark job dispatched");
                if let Err(e) = self.coord.release_slot(job_id).await {
                    tracing::warn!(job_id = %job_id, error = %e, "Slot release failed");
                }
                continue;
            }

            tracing::info!(
                job_id = %job_id,
                retry_count = descriptor.retry_count,
                "Job dispatched",
            );
            self.workers
                .spawn(self.worker.clone().run(descriptor, payload));
            report.started += 1;
        }

        report
    }

    /// A descriptor whose payload is not held here.
    async fn handle_not_local(&self, descriptor: JobDescriptor, report: &mut DispatchReport) {
        let job_id = descriptor.job_id;

        if descriptor.origin == self.origin {
            tracing::warn!(
                job_id = %job_id,
                "Discarding own queue entry whose payload is gone",
            );
            report.discarded += 1;
            return;
        }

        if let Some(cap) = self.config.max_bounces {
            let mut bounces = self.bounces.lock().await;
            let count = bounces.entry(job_id).or_insert(0);
            if *count >= cap {
                bounces.remove(&job_id);
                tracing::warn!(
                    job_id = %job_id,
                    origin = %descriptor.origin,
                    bounces = cap,
                    "Dropping foreign queue entry after bounce cap",
                );
                report.discarded += 1;
                return;
            }
            *count += 1;
        }

        self.push_back(&descriptor).await;
        report.bounced += 1;
    }

    async fn push_back(&self, descriptor: &JobDescriptor) {
        if let Err(e) = self.queue.push_back(descriptor).await {
            tracing::warn!(
                job_id = %descriptor.job_id,
                error = %e,
                "Could not return descriptor to the shared queue",
            );
        }
    }
}
