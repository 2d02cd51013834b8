//! Error types for the sandbox layer.

use thiserror::Error;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Errors that can occur while creating, pooling, or driving sandboxes.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The sandbox specification is invalid; no process was spawned.
    #[error("invalid sandbox configuration: {0}")]
    ConfigInvalid(String),

    /// The isolation binary could not be spawned.
    #[error("failed to spawn isolation binary: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// The sandbox failed warmup, a health probe, or the framed protocol.
    #[error("sandbox unhealthy: {0}")]
    Unhealthy(String),

    /// No Ready sandbox became available within the acquire timeout.
    #[error("sandbox pool exhausted")]
    PoolExhausted,

    /// The pool is shutting down and no longer hands out sandboxes.
    #[error("sandbox pool is shut down")]
    ShuttingDown,

    /// Frame encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] crucible_core::protocol::ProtocolError),

    /// I/O error on scratch directories or sandbox pipes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
