//! HTTP front end for the `retouch` dispatcher.
//!
//! Each running instance of this binary is one front-end process: it owns
//! the payloads of the jobs submitted to it, runs the dispatcher and
//! snapshot loops in the background, and shares the queue and admission set
//! with every other instance through the coordination store.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
