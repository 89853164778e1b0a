//! Client for the RunningHub asynchronous workflow API.
//!
//! - [`api`]: HTTP client for the five workflow operations.
//! - [`messages`]: response envelopes and remote task status parsing.
//! - [`backend`]: the [`WorkflowBackend`] trait the job pipeline drives,
//!   implemented by [`RunningHubApi`] and by scripted fakes in tests.

pub mod api;
pub mod backend;
pub mod messages;

pub use api::{RunningHubApi, RunningHubApiError};
pub use backend::WorkflowBackend;
pub use messages::RemoteStatus;
