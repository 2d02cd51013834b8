//! Data transfer objects for the API.

use serde::{Deserialize, Serialize};

// ============================================================================
// Execution
// ============================================================================

/// An input file attached to an execution request.
#[derive(Debug, Deserialize)]
pub struct InputFileDto {
    /// File name, relative to the sandbox scratch root.
    pub name: String,
    /// Base64-encoded content, for inline files.
    pub content_b64: Option<String>,
    /// `{sessionId}/{fileId}` blob reference, for uploaded files.
    pub reference: Option<String>,
}

/// Request to execute code.
#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    /// Language tag (`py`, `js`, `ts`, `go`, `java`, `c`, `cpp`, `php`,
    /// `rs`, `r`, `f90`, `d`).
    pub language: String,
    /// Source code to execute.
    pub code: String,
    /// Session to run under; omitted means a fresh session.
    pub session_id: Option<String>,
    /// Files staged into the sandbox before execution.
    #[serde(default)]
    pub files: Vec<InputFileDto>,
    /// Whether to capture updated session state. Defaults to true for
    /// the interactive language, false otherwise.
    pub capture_state: Option<bool>,
    /// Wall-clock limit in seconds; defaults from configuration.
    pub time_limit_secs: Option<u64>,
    /// Memory limit in megabytes; defaults from configuration.
    pub memory_limit_mb: Option<u64>,
}

/// A produced file in an execution response.
#[derive(Debug, Serialize)]
pub struct OutputFileDto {
    /// File name, relative to the scratch root.
    pub name: String,
    /// Blob reference for `/download`, when the file was stored.
    pub reference: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// True when the file exceeded the per-file cap and was withheld.
    pub truncated: bool,
}

/// Response for an executed program (including user-code failures).
#[derive(Debug, Serialize)]
pub struct ExecResponse {
    /// Session the execution ran under, echoed or created.
    pub session_id: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code of the user program.
    pub exit_code: i32,
    /// References to produced files.
    pub files: Vec<OutputFileDto>,
    /// Non-fatal warnings (truncation, state-save failures, ...).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ============================================================================
// File transport
// ============================================================================

/// Request to upload an input file.
#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    /// Session to attach the file to; omitted mints a new session id.
    pub session_id: Option<String>,
    /// Original file name, echoed back.
    pub name: String,
    /// Base64-encoded file content.
    pub content_b64: String,
}

/// Response after an upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// `{sessionId}/{fileId}` reference for later requests.
    pub reference: String,
    /// Session the file belongs to.
    pub session_id: String,
    /// Echoed file name.
    pub name: String,
    /// Stored size in bytes.
    pub size: u64,
}

// ============================================================================
// Health
// ============================================================================

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
}

/// Pool gauges in the detailed health response.
#[derive(Debug, Serialize)]
pub struct PoolHealth {
    /// Ready sandboxes.
    pub ready: usize,
    /// Launches in flight.
    pub warming: usize,
    /// Configured target.
    pub target: usize,
    /// True when at least one pre-warmed interpreter is available.
    pub interpreter_ready: bool,
}

/// Component-level health.
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    /// Overall status: `healthy` or `degraded`.
    pub status: String,
    /// Hot-tier store health.
    pub hot_store: bool,
    /// Cold-tier store health.
    pub cold_store: bool,
    /// Blob store health.
    pub blob_store: bool,
    /// Sandbox pool utilization.
    pub pool: PoolHealth,
}
