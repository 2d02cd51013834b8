//! Configuration for the API service, loaded from environment variables.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crucible_core::request::RequestBounds;
use crucible_sandbox::files::OutputCaps;
use crucible_sandbox::manager::SandboxConfig;
use crucible_sandbox::pool::PoolConfig;
use crucible_state::archivist::ArchivistConfig;
use crucible_state::store::StateStoreConfig;

/// Where a byte-store backend keeps its data.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// In-process, lost on restart. The default for local development.
    Memory,
    /// Filesystem-backed under the given root.
    Fs(PathBuf),
}

/// Service configuration. Every option has a default; environment
/// variables override.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind the HTTP server to.
    pub host: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Path of the isolation binary.
    pub isolation_binary: PathBuf,
    /// Base directory for sandbox scratch directories.
    pub sandbox_base_dir: PathBuf,
    /// tmpfs size for `/tmp` inside sandboxes, in megabytes.
    pub tmpfs_size_mb: u64,
    /// Memory limit applied when a request does not set one, in bytes.
    pub default_memory_limit: u64,
    /// Largest memory limit a request may ask for, in bytes.
    pub max_memory_limit: u64,
    /// Wall-clock limit applied when a request does not set one.
    pub default_time_limit: Duration,
    /// Largest wall-clock limit a request may ask for.
    pub max_time_limit: Duration,
    /// Wall-clock limit for compile steps.
    pub compile_time_limit: Duration,
    /// Process-count limit inside sandboxes.
    pub pids_limit: u32,
    /// Pre-warmed population target for the interactive language.
    pub pool_target: usize,
    /// How long an execution waits for a Ready sandbox.
    pub pool_acquire_timeout: Duration,
    /// How long interpreter warmup may take.
    pub warmup_timeout: Duration,
    /// Whether acquisition runs a liveness probe.
    pub health_check_on_acquire: bool,
    /// Deadline for the acquisition liveness probe.
    pub health_check_timeout: Duration,
    /// Ready sandboxes older than this are evicted.
    pub sandbox_ttl: Duration,
    /// Hot-tier TTL for session snapshots.
    pub hot_ttl: Duration,
    /// Cold-tier TTL, applied by the object store's lifecycle rules.
    pub cold_ttl: Duration,
    /// Hot entries idle past this are archived.
    pub archive_after: Duration,
    /// Archivist scan interval.
    pub archive_scan_interval: Duration,
    /// Maximum accepted snapshot size, in bytes.
    pub max_snapshot_bytes: usize,
    /// Maximum accepted code size, in bytes.
    pub max_code_bytes: usize,
    /// Maximum output files returned per execution.
    pub max_output_files: usize,
    /// Maximum size of a returned output file, in bytes.
    pub max_output_file_bytes: u64,
    /// Maximum bytes kept of each captured stream.
    pub max_stream_bytes: usize,
    /// Backend for the state store's cold tier.
    pub state_backend: StorageBackend,
    /// Backend for uploaded/produced file blobs.
    pub blob_backend: StorageBackend,
    /// Interpreter binary for the interactive language.
    pub python_binary: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            isolation_binary: PathBuf::from("bwrap"),
            sandbox_base_dir: PathBuf::from("/var/lib/crucible/sandboxes"),
            tmpfs_size_mb: 64,
            default_memory_limit: 512 * 1024 * 1024,
            max_memory_limit: 2048 * 1024 * 1024,
            default_time_limit: Duration::from_secs(30),
            max_time_limit: Duration::from_secs(120),
            compile_time_limit: Duration::from_secs(60),
            pids_limit: 64,
            pool_target: 2,
            pool_acquire_timeout: Duration::from_secs(10),
            warmup_timeout: Duration::from_secs(30),
            health_check_on_acquire: true,
            health_check_timeout: Duration::from_secs(2),
            sandbox_ttl: Duration::from_secs(15 * 60),
            hot_ttl: Duration::from_secs(7200),
            cold_ttl: Duration::from_secs(24 * 3600),
            archive_after: Duration::from_secs(30 * 60),
            archive_scan_interval: Duration::from_secs(60),
            max_snapshot_bytes: 16 * 1024 * 1024,
            max_code_bytes: 1024 * 1024,
            max_output_files: 20,
            max_output_file_bytes: 10 * 1024 * 1024,
            max_stream_bytes: 1024 * 1024,
            state_backend: StorageBackend::Memory,
            blob_backend: StorageBackend::Memory,
            python_binary: "python3".to_string(),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid value: {e}")),
        Err(_) => default,
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(name, default.as_secs()))
}

fn env_backend(name: &str) -> StorageBackend {
    match env::var(name) {
        Ok(raw) if raw == "memory" => StorageBackend::Memory,
        Ok(raw) => StorageBackend::Fs(PathBuf::from(raw)),
        Err(_) => StorageBackend::Memory,
    }
}

impl Config {
    /// Load configuration from environment variables, defaulting every
    /// unset option.
    ///
    /// # Panics
    ///
    /// Panics when a set variable does not parse, the same way the
    /// service refuses to start on any other invalid configuration.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            isolation_binary: PathBuf::from(
                env::var("ISOLATION_BINARY").unwrap_or_else(|_| "bwrap".to_string()),
            ),
            sandbox_base_dir: env::var("SANDBOX_BASE_DIR")
                .map_or(defaults.sandbox_base_dir, PathBuf::from),
            tmpfs_size_mb: env_parse("SANDBOX_TMPFS_MB", defaults.tmpfs_size_mb),
            default_memory_limit: env_parse("DEFAULT_MEMORY_LIMIT_MB", 512) * 1024 * 1024,
            max_memory_limit: env_parse("MAX_MEMORY_LIMIT_MB", 2048) * 1024 * 1024,
            default_time_limit: env_secs("DEFAULT_TIME_LIMIT_SECS", defaults.default_time_limit),
            max_time_limit: env_secs("MAX_TIME_LIMIT_SECS", defaults.max_time_limit),
            compile_time_limit: env_secs("COMPILE_TIME_LIMIT_SECS", defaults.compile_time_limit),
            pids_limit: env_parse("SANDBOX_PIDS_LIMIT", defaults.pids_limit),
            pool_target: env_parse("POOL_TARGET", defaults.pool_target),
            pool_acquire_timeout: env_secs(
                "POOL_ACQUIRE_TIMEOUT_SECS",
                defaults.pool_acquire_timeout,
            ),
            warmup_timeout: env_secs("WARMUP_TIMEOUT_SECS", defaults.warmup_timeout),
            health_check_on_acquire: env_parse(
                "HEALTH_CHECK_ON_ACQUIRE",
                defaults.health_check_on_acquire,
            ),
            health_check_timeout: env_secs(
                "HEALTH_CHECK_TIMEOUT_SECS",
                defaults.health_check_timeout,
            ),
            sandbox_ttl: env_secs("SANDBOX_TTL_SECS", defaults.sandbox_ttl),
            hot_ttl: env_secs("HOT_TTL_SECS", defaults.hot_ttl),
            cold_ttl: env_secs("COLD_TTL_SECS", defaults.cold_ttl),
            archive_after: env_secs("ARCHIVE_AFTER_SECS", defaults.archive_after),
            archive_scan_interval: env_secs(
                "ARCHIVE_SCAN_INTERVAL_SECS",
                defaults.archive_scan_interval,
            ),
            max_snapshot_bytes: env_parse("MAX_SNAPSHOT_MB", 16) * 1024 * 1024,
            max_code_bytes: env_parse("MAX_CODE_BYTES", defaults.max_code_bytes),
            max_output_files: env_parse("MAX_OUTPUT_FILES", defaults.max_output_files),
            max_output_file_bytes: env_parse("MAX_OUTPUT_FILE_MB", 10) * 1024 * 1024,
            max_stream_bytes: env_parse("MAX_STREAM_BYTES", defaults.max_stream_bytes),
            state_backend: env_backend("STATE_STORE_DIR"),
            blob_backend: env_backend("BLOB_STORE_DIR"),
            python_binary: env::var("PYTHON_BINARY").unwrap_or(defaults.python_binary),
        }
    }

    /// The socket address to bind to.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The request validation envelope.
    #[must_use]
    pub fn bounds(&self) -> RequestBounds {
        RequestBounds {
            max_code_bytes: self.max_code_bytes,
            max_time_limit: self.max_time_limit,
            max_memory_bytes: self.max_memory_limit,
            ..RequestBounds::default()
        }
    }

    /// Sandbox construction parameters.
    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            isolation_binary: self.isolation_binary.clone(),
            base_dir: self.sandbox_base_dir.clone(),
            tmpfs_size_mb: self.tmpfs_size_mb,
            default_memory_limit: self.default_memory_limit,
            pids_limit: self.pids_limit,
            warmup_timeout: self.warmup_timeout,
            destroy_grace: Duration::from_millis(500),
            python_binary: self.python_binary.clone(),
        }
    }

    /// Pool tuning.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            target: self.pool_target,
            acquire_timeout: self.pool_acquire_timeout,
            launch_parallelism: self.pool_target.max(1),
            sandbox_ttl: self.sandbox_ttl,
            health_check: self.health_check_on_acquire,
            health_check_timeout: self.health_check_timeout,
            ..PoolConfig::default()
        }
    }

    /// Output collection caps.
    #[must_use]
    pub fn output_caps(&self) -> OutputCaps {
        OutputCaps {
            max_files: self.max_output_files,
            max_file_bytes: self.max_output_file_bytes,
            max_stream_bytes: self.max_stream_bytes,
        }
    }

    /// State store tuning.
    #[must_use]
    pub fn state_store_config(&self) -> StateStoreConfig {
        StateStoreConfig {
            hot_ttl: self.hot_ttl,
            max_snapshot_bytes: self.max_snapshot_bytes,
            ..StateStoreConfig::default()
        }
    }

    /// Archivist tuning.
    #[must_use]
    pub fn archivist_config(&self) -> ArchivistConfig {
        ArchivistConfig {
            scan_interval: self.archive_scan_interval,
            archive_after: self.archive_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = Config::default();
        assert!(config.default_time_limit <= config.max_time_limit);
        assert!(config.default_memory_limit <= config.max_memory_limit);
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn bounds_follow_config() {
        let config = Config {
            max_code_bytes: 42,
            ..Config::default()
        };
        assert_eq!(config.bounds().max_code_bytes, 42);
    }
}
