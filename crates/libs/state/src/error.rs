//! Error types for the state layer.

use thiserror::Error;

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur in the state store tiers.
#[derive(Debug, Error)]
pub enum StateError {
    /// The key is absent (or expired) in the queried tier.
    #[error("not found")]
    NotFound,

    /// A snapshot exceeded the configured size bound; nothing was stored.
    #[error("snapshot is {actual} bytes, limit is {max}")]
    TooLarge {
        /// Rejected snapshot size.
        actual: usize,
        /// Configured bound.
        max: usize,
    },

    /// The backing store is unreachable or failing.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A metadata document failed to encode or decode.
    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
