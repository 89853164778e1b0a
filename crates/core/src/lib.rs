//! Domain types and pure policies for the `retouch` job dispatcher.
//!
//! Zero internal dependencies: the coordination layer, the vendor client,
//! and the pipeline all build on the types defined here.

pub mod config;
pub mod error;
pub mod job;
pub mod progress;
pub mod retry;
pub mod types;
