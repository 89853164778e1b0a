//! Job pipeline for the `retouch` dispatcher.
//!
//! - [`config`]: pipeline tunables loaded from the environment.
//! - [`record`]: per-process job records and their serializable snapshots.
//! - [`registry`]: the local job table ([`LocalJobs`]).
//! - [`dispatcher`]: per-process loop admitting queued jobs into slots.
//! - [`worker`]: the upload -> submit -> poll -> fetch -> download state machine.
//! - [`snapshot`]: best-effort session snapshots and recovery view.
//! - [`service`]: the [`JobService`] facade used by the HTTP layer.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod queue;
pub mod record;
pub mod registry;
pub mod service;
pub mod snapshot;
pub mod worker;

pub use config::PipelineConfig;
pub use error::JobError;
pub use events::JobEvent;
pub use record::{JobRecord, JobSnapshot};
pub use registry::LocalJobs;
pub use service::JobService;
