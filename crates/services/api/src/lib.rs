//! Crucible API service library.
//!
//! Wires the sandbox pool, the two-tier state store, and the blob store
//! into the execution orchestrator, and exposes them over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod files;
pub mod orchestrator;
pub mod state;

pub use config::Config;
pub use state::AppState;
