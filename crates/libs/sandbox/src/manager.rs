//! Sandbox construction and destruction.
//!
//! The manager owns the piece between the isolation driver and the pool:
//! it allocates a scratch directory, stages the interpreter server script
//! for interactive sandboxes, launches the process, waits for the ready
//! marker, and tears everything down again.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crucible_core::language::Language;
use crucible_core::protocol::READY_MARKER;

use crate::error::{Result, SandboxError};
use crate::isolation::{IsolationDriver, IsolationSpec, StdioMode};

/// Name under which the interpreter server script is staged into scratch.
/// Dot-prefixed, so it is invisible to output scans.
pub const SERVER_SCRIPT: &str = ".server.py";

/// The interpreter server source, embedded at build time.
const SERVER_SOURCE: &str = include_str!("../assets/server.py");

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// Being launched; not yet available.
    Warming,
    /// Available for acquisition.
    Ready,
    /// Owned by a request.
    InUse,
    /// Torn down; never referenced by the pool again.
    Destroyed,
}

/// The framed-protocol session of an interactive sandbox.
#[derive(Debug)]
pub struct ReplSession {
    pub(crate) stdin: ChildStdin,
    pub(crate) reader: BufReader<ChildStdout>,
}

/// One isolated process tree plus its scratch directory.
///
/// Owned exclusively: by the pool while Ready, by a single request after
/// acquisition. Destruction is idempotent, and dropping an undestroyed
/// sandbox kills the child (`kill_on_drop`) and removes the scratch
/// directory best-effort, so cancellation can never leak either.
#[derive(Debug)]
pub struct Sandbox {
    id: String,
    language: Language,
    scratch_dir: PathBuf,
    child: Option<Child>,
    repl: Option<ReplSession>,
    created_at: Instant,
    state: SandboxState,
    destroyed: bool,
    destroy_grace: Duration,
}

impl Sandbox {
    /// Opaque sandbox identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Language this sandbox executes.
    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    /// Host path of the scratch directory.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SandboxState {
        self.state
    }

    /// Mark the sandbox as owned by a request.
    pub fn mark_in_use(&mut self) {
        self.state = SandboxState::InUse;
    }

    /// True once this sandbox has outlived `ttl`.
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }

    /// The framed-protocol session, for interactive sandboxes.
    pub fn repl_mut(&mut self) -> Option<&mut ReplSession> {
        self.repl.as_mut()
    }

    /// True while the underlying process has not exited.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    /// Tear the sandbox down: close the protocol session, terminate the
    /// process tree, reap it, and remove the scratch directory.
    ///
    /// Idempotent; destroying an already-destroyed sandbox is a no-op.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.state = SandboxState::Destroyed;

        // Closing stdin asks the interpreter server to exit on its own.
        drop(self.repl.take());

        if let Some(mut child) = self.child.take() {
            if timeout(self.destroy_grace, child.wait()).await.is_err() {
                if let Err(e) = child.kill().await {
                    warn!(sandbox_id = %self.id, error = %e, "Failed to kill sandbox process");
                }
            }
        }

        match tokio::fs::remove_dir_all(&self.scratch_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    sandbox_id = %self.id,
                    scratch = %self.scratch_dir.display(),
                    error = %e,
                    "Failed to remove scratch directory"
                );
            }
        }

        debug!(sandbox_id = %self.id, "Sandbox destroyed");
    }

    #[cfg(test)]
    pub(crate) fn set_repl_for_tests(&mut self, repl: ReplSession) {
        self.repl = Some(repl);
    }

    #[cfg(test)]
    pub(crate) fn stub(language: Language, scratch_dir: PathBuf, child: Option<Child>) -> Self {
        Self {
            id: format!("stub-{}", Uuid::new_v4().simple()),
            language,
            scratch_dir,
            child,
            repl: None,
            created_at: Instant::now(),
            state: SandboxState::Ready,
            destroyed: false,
            destroy_grace: Duration::from_millis(100),
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.destroyed {
            // The child is killed by kill_on_drop; the scratch directory is
            // removed synchronously best-effort.
            let _ = std::fs::remove_dir_all(&self.scratch_dir);
        }
    }
}

/// Construction parameters for sandboxes.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Path of the isolation binary.
    pub isolation_binary: PathBuf,
    /// Base directory under which scratch directories are allocated.
    pub base_dir: PathBuf,
    /// tmpfs size for `/tmp` inside each sandbox, in megabytes.
    pub tmpfs_size_mb: u64,
    /// Memory limit applied when a request does not carry its own.
    pub default_memory_limit: u64,
    /// Process-count limit inside each sandbox.
    pub pids_limit: u32,
    /// How long the interpreter server may take to emit its ready marker.
    pub warmup_timeout: Duration,
    /// How long destruction waits for a voluntary exit before killing.
    pub destroy_grace: Duration,
    /// Interpreter binary for the interactive language.
    pub python_binary: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            isolation_binary: PathBuf::from("bwrap"),
            base_dir: PathBuf::from("/var/lib/crucible/sandboxes"),
            tmpfs_size_mb: 64,
            default_memory_limit: 512 * 1024 * 1024,
            pids_limit: 64,
            warmup_timeout: Duration::from_secs(30),
            destroy_grace: Duration::from_millis(500),
            python_binary: "python3".to_string(),
        }
    }
}

/// Builds and destroys sandboxes.
#[derive(Debug)]
pub struct SandboxManager {
    config: SandboxConfig,
    driver: IsolationDriver,
    counter: AtomicU64,
}

impl SandboxManager {
    /// Create a manager from its configuration.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        let driver = IsolationDriver::new(config.isolation_binary.clone());
        Self {
            config,
            driver,
            counter: AtomicU64::new(0),
        }
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The isolation driver, for executors that spawn additional
    /// per-step processes inside an existing sandbox.
    #[must_use]
    pub fn driver(&self) -> &IsolationDriver {
        &self.driver
    }

    /// The isolation spec for a sandbox rooted at `scratch_dir`.
    #[must_use]
    pub fn isolation_spec(&self, scratch_dir: &Path, memory_limit: u64) -> IsolationSpec {
        IsolationSpec::new(
            scratch_dir.to_path_buf(),
            self.config.tmpfs_size_mb,
            memory_limit,
            self.config.pids_limit,
        )
    }

    /// Build a fresh sandbox for `language`.
    ///
    /// Interactive sandboxes launch the interpreter server and block until
    /// its ready marker arrives; everything else gets a scratch directory
    /// and no long-lived process (the one-shot executor spawns per step).
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Unhealthy`] when the interpreter server
    /// exits or stays silent through the warmup window, or spawn/IO errors
    /// from the launch itself. The scratch directory is cleaned up on
    /// every failure path.
    pub async fn create(&self, language: Language) -> Result<Sandbox> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = format!("sbx-{}-{seq}", language.tag());
        let scratch_dir = self
            .config
            .base_dir
            .join(format!("{id}-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&scratch_dir).await?;

        let mut sandbox = Sandbox {
            id,
            language,
            scratch_dir,
            child: None,
            repl: None,
            created_at: Instant::now(),
            state: SandboxState::Warming,
            destroyed: false,
            destroy_grace: self.config.destroy_grace,
        };

        if language.is_interactive() {
            if let Err(e) = self.launch_interpreter(&mut sandbox).await {
                sandbox.destroy().await;
                return Err(e);
            }
        }

        sandbox.state = SandboxState::Ready;
        info!(sandbox_id = %sandbox.id, %language, "Sandbox ready");
        Ok(sandbox)
    }

    async fn launch_interpreter(&self, sandbox: &mut Sandbox) -> Result<()> {
        tokio::fs::write(sandbox.scratch_dir.join(SERVER_SCRIPT), SERVER_SOURCE).await?;

        let spec = self.isolation_spec(&sandbox.scratch_dir, self.config.default_memory_limit);
        let command = vec![self.config.python_binary.clone(), SERVER_SCRIPT.to_string()];
        let mut child = self.driver.spawn(&spec, &command, StdioMode::Interactive)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Unhealthy("sandbox stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Unhealthy("sandbox stdout not piped".to_string()))?;
        let mut reader = BufReader::new(stdout);

        wait_for_ready(&mut reader, self.config.warmup_timeout).await?;

        sandbox.child = Some(child);
        sandbox.repl = Some(ReplSession { stdin, reader });
        Ok(())
    }
}

/// Read stdout lines until the ready marker arrives, tolerating noise.
async fn wait_for_ready(
    reader: &mut BufReader<ChildStdout>,
    warmup_timeout: Duration,
) -> Result<()> {
    let wait = async {
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(SandboxError::Unhealthy(
                    "interpreter exited during warmup".to_string(),
                ));
            }
            if line.trim() == READY_MARKER {
                return Ok(());
            }
        }
    };

    match timeout(warmup_timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(SandboxError::Unhealthy(format!(
            "interpreter warmup exceeded {warmup_timeout:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sleeping_child() -> Child {
        tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep")
    }

    #[tokio::test]
    async fn destroy_removes_scratch_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("sbx");
        tokio::fs::create_dir_all(&scratch).await.unwrap();

        let child = sleeping_child().await;
        let mut sandbox = Sandbox::stub(Language::Python, scratch.clone(), Some(child));

        sandbox.destroy().await;
        assert_eq!(sandbox.state(), SandboxState::Destroyed);
        assert!(!scratch.exists());

        // Second destroy is a no-op.
        sandbox.destroy().await;
        assert_eq!(sandbox.state(), SandboxState::Destroyed);
    }

    #[tokio::test]
    async fn expiry_follows_ttl() {
        tokio::time::pause();
        let dir = tempfile::tempdir().unwrap();
        let mut sandbox = Sandbox::stub(Language::Python, dir.path().join("sbx"), None);

        assert!(!sandbox.is_expired(Duration::from_secs(60)));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(sandbox.is_expired(Duration::from_secs(60)));

        sandbox.destroy().await;
    }

    #[tokio::test]
    async fn sandbox_ids_are_unique_and_monotonic() {
        let manager = SandboxManager::new(SandboxConfig {
            base_dir: tempfile::tempdir().unwrap().keep(),
            ..SandboxConfig::default()
        });

        let mut a = manager.create(Language::C).await.unwrap();
        let mut b = manager.create(Language::C).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("sbx-c-"));

        a.destroy().await;
        b.destroy().await;
    }

    #[tokio::test]
    #[ignore = "requires bubblewrap and python3 on the host"]
    async fn interactive_create_reaches_ready() {
        let manager = SandboxManager::new(SandboxConfig {
            base_dir: tempfile::tempdir().unwrap().keep(),
            ..SandboxConfig::default()
        });

        let mut sandbox = manager.create(Language::Python).await.unwrap();
        assert_eq!(sandbox.state(), SandboxState::Ready);
        assert!(sandbox.repl_mut().is_some());
        assert!(sandbox.is_alive());
        sandbox.destroy().await;
    }
}
