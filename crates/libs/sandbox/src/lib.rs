//! Sandboxed execution for the Crucible service.
//!
//! This crate owns everything between an execution request and an operating
//! system process: the isolation driver that launches the external sandboxing
//! binary, the sandbox manager (scratch directories, spawn, destroy), the
//! pre-warmed sandbox pool for the interactive language, and the two
//! executors — one-shot for compiled/scripted languages, REPL for the framed
//! interpreter protocol.

pub mod error;
pub mod files;
pub mod isolation;
pub mod manager;
pub mod oneshot;
pub mod pool;
pub mod repl;

pub use error::{Result, SandboxError};
pub use isolation::{IsolationDriver, IsolationSpec};
pub use manager::{Sandbox, SandboxConfig, SandboxManager, SandboxState};
pub use oneshot::OneShotExecutor;
pub use pool::{PoolConfig, PoolStats, SandboxFactory, SandboxPool};
pub use repl::ReplExecutor;
