//! Launching the external isolation binary.
//!
//! The driver turns a declarative [`IsolationSpec`] into the argument vector
//! for a bubblewrap-compatible sandboxing binary and spawns it. The spawned
//! process runs under fresh PID/UTS/IPC namespaces (plus a network namespace
//! unless explicitly allowed), sees the host filesystem only through the
//! configured binds, and has its memory and process count capped through an
//! rlimit prelude. Wall-clock enforcement stays host-side with the
//! executors' kill timers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Result, SandboxError};

/// Read-only system paths bound into every sandbox by default.
const DEFAULT_RO_BINDS: &[&str] = &["/usr", "/lib", "/lib64", "/bin", "/sbin", "/etc"];

/// Mount point of the scratch directory inside the sandbox.
pub const SCRATCH_MOUNT: &str = "/work";

/// Declarative description of one sandbox launch.
#[derive(Debug, Clone)]
pub struct IsolationSpec {
    /// Host path bound read-write at [`SCRATCH_MOUNT`].
    pub scratch_dir: PathBuf,
    /// Host paths bound read-only at their own location.
    pub ro_binds: Vec<PathBuf>,
    /// Size of the tmpfs mounted on `/tmp`, in megabytes.
    pub tmpfs_size_mb: u64,
    /// Virtual memory cap for the child, in bytes.
    pub memory_limit: u64,
    /// Process-count cap for the child.
    pub pids_limit: u32,
    /// CPU-time cap for the child, when set.
    pub cpu_time_limit: Option<Duration>,
    /// Run the child as this uid/gid inside a user namespace, when set.
    pub user: Option<(u32, u32)>,
    /// Whether the sandbox keeps network access. Off by default.
    pub network: bool,
    /// Hostname visible inside the sandbox.
    pub hostname: String,
}

impl IsolationSpec {
    /// A spec with the default system binds and no network, rooted at
    /// `scratch_dir`.
    #[must_use]
    pub fn new(scratch_dir: PathBuf, tmpfs_size_mb: u64, memory_limit: u64, pids_limit: u32) -> Self {
        Self {
            scratch_dir,
            ro_binds: DEFAULT_RO_BINDS.iter().map(PathBuf::from).collect(),
            tmpfs_size_mb,
            memory_limit,
            pids_limit,
            cpu_time_limit: None,
            user: None,
            network: false,
            hostname: "sandbox".to_string(),
        }
    }

    fn validate(&self, command: &[String]) -> Result<()> {
        if command.is_empty() {
            return Err(SandboxError::ConfigInvalid("empty command".to_string()));
        }
        if !self.scratch_dir.is_absolute() {
            return Err(SandboxError::ConfigInvalid(format!(
                "scratch dir {} is not absolute",
                self.scratch_dir.display()
            )));
        }
        if self.tmpfs_size_mb == 0 {
            return Err(SandboxError::ConfigInvalid("tmpfs size is zero".to_string()));
        }
        if self.memory_limit == 0 || self.pids_limit == 0 {
            return Err(SandboxError::ConfigInvalid(
                "memory and pids limits must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the child's stdio is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// stdin piped for the framed protocol, stdout piped, stderr discarded.
    Interactive,
    /// stdin closed, stdout and stderr piped for capture.
    Capture,
}

/// Spawns sandboxed processes through the external isolation binary.
#[derive(Debug, Clone)]
pub struct IsolationDriver {
    binary: PathBuf,
}

impl IsolationDriver {
    /// Create a driver for the given isolation binary (bubblewrap by
    /// default in the service configuration).
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Build the full argument vector for one launch.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ConfigInvalid`] when the spec cannot
    /// describe a launchable sandbox; nothing is spawned in that case.
    pub fn build_args(&self, spec: &IsolationSpec, command: &[String]) -> Result<Vec<String>> {
        spec.validate(command)?;

        let mut args: Vec<String> = Vec::with_capacity(48 + command.len());
        let mut push = |parts: &[&str]| args.extend(parts.iter().map(ToString::to_string));

        // Namespace isolation.
        push(&["--unshare-pid", "--unshare-uts", "--unshare-ipc"]);
        if !spec.network {
            push(&["--unshare-net"]);
        }
        if let Some((uid, gid)) = spec.user {
            let (uid, gid) = (uid.to_string(), gid.to_string());
            push(&["--unshare-user", "--uid", &uid, "--gid", &gid]);
        }

        // Lifetime and session hygiene.
        push(&["--die-with-parent", "--new-session"]);

        // Read-only view of the system.
        for bind in &spec.ro_binds {
            let path = bind.to_string_lossy();
            push(&["--ro-bind", &path, &path]);
        }

        // Device and proc filesystems.
        push(&["--dev", "/dev", "--proc", "/proc"]);

        // Sized tmpfs for /tmp, plain tmpfs for /run.
        let tmpfs_bytes = (spec.tmpfs_size_mb * 1024 * 1024).to_string();
        push(&["--size", &tmpfs_bytes, "--tmpfs", "/tmp"]);
        push(&["--tmpfs", "/run"]);

        // Writable scratch, working directory, hostname.
        let scratch = spec.scratch_dir.to_string_lossy();
        push(&["--bind", &scratch, SCRATCH_MOUNT]);
        push(&["--chdir", SCRATCH_MOUNT]);
        push(&["--hostname", &spec.hostname]);

        // Minimal environment.
        push(&["--clearenv"]);
        push(&["--setenv", "PATH", "/usr/local/bin:/usr/bin:/bin"]);
        push(&["--setenv", "HOME", SCRATCH_MOUNT]);
        push(&["--setenv", "TMPDIR", "/tmp"]);
        push(&["--setenv", "LANG", "C.UTF-8"]);

        // Rlimit prelude around the inner command. `"$@"` keeps the
        // argument vector intact without any shell quoting.
        let memory_kb = spec.memory_limit / 1024;
        let mut prelude = format!(
            "ulimit -v {memory_kb} 2>/dev/null; ulimit -u {} 2>/dev/null; ",
            spec.pids_limit
        );
        if let Some(cpu) = spec.cpu_time_limit {
            prelude.push_str(&format!("ulimit -t {} 2>/dev/null; ", cpu.as_secs().max(1)));
        }
        prelude.push_str("exec \"$@\"");
        push(&["/bin/sh", "-c", &prelude, "sh"]);
        args.extend(command.iter().cloned());

        Ok(args)
    }

    /// Spawn `command` inside a sandbox described by `spec`.
    ///
    /// The child carries `kill_on_drop`, so dropping the handle can never
    /// leak a sandboxed process tree.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ConfigInvalid`] for a bad spec and
    /// [`SandboxError::SpawnFailed`] when the isolation binary cannot be
    /// started.
    pub fn spawn(&self, spec: &IsolationSpec, command: &[String], stdio: StdioMode) -> Result<Child> {
        let args = self.build_args(spec, command)?;
        debug!(binary = %self.binary.display(), command = ?command, "Spawning sandbox");

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args).kill_on_drop(true);

        match stdio {
            StdioMode::Interactive => {
                cmd.stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::null());
            }
            StdioMode::Capture => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
        }

        cmd.spawn().map_err(SandboxError::SpawnFailed)
    }

    /// Path of the configured isolation binary.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> IsolationSpec {
        IsolationSpec::new(
            PathBuf::from("/var/lib/crucible/sbx-py-1"),
            64,
            512 * 1024 * 1024,
            64,
        )
    }

    fn driver() -> IsolationDriver {
        IsolationDriver::new(PathBuf::from("bwrap"))
    }

    fn command() -> Vec<String> {
        vec!["python3".to_string(), ".server.py".to_string()]
    }

    #[test]
    fn network_unshared_by_default() {
        let args = driver().build_args(&spec(), &command()).unwrap();
        assert!(args.contains(&"--unshare-net".to_string()));
        assert!(args.contains(&"--unshare-pid".to_string()));
        assert!(args.contains(&"--die-with-parent".to_string()));
    }

    #[test]
    fn network_flag_respected() {
        let mut spec = spec();
        spec.network = true;
        let args = driver().build_args(&spec, &command()).unwrap();
        assert!(!args.contains(&"--unshare-net".to_string()));
    }

    #[test]
    fn scratch_bound_read_write_at_work() {
        let args = driver().build_args(&spec(), &command()).unwrap();
        let idx = args.iter().position(|a| a == "--bind").unwrap();
        assert_eq!(args[idx + 1], "/var/lib/crucible/sbx-py-1");
        assert_eq!(args[idx + 2], SCRATCH_MOUNT);
    }

    #[test]
    fn rlimit_prelude_carries_limits() {
        let args = driver().build_args(&spec(), &command()).unwrap();
        let prelude = args
            .iter()
            .find(|a| a.starts_with("ulimit"))
            .expect("rlimit prelude present");
        assert!(prelude.contains(&format!("ulimit -v {}", 512 * 1024)));
        assert!(prelude.contains("ulimit -u 64"));
        assert!(prelude.ends_with("exec \"$@\""));
    }

    #[test]
    fn command_appended_after_prelude() {
        let args = driver().build_args(&spec(), &command()).unwrap();
        assert_eq!(args[args.len() - 2..], ["python3", ".server.py"]);
        // The positional placeholder for "$@" sits right before the command.
        assert_eq!(args[args.len() - 3], "sh");
    }

    #[test]
    fn user_mapping_and_cpu_limit_emitted_when_set() {
        let mut spec = spec();
        spec.user = Some((1000, 1000));
        spec.cpu_time_limit = Some(Duration::from_secs(20));
        let args = driver().build_args(&spec, &command()).unwrap();

        let idx = args.iter().position(|a| a == "--unshare-user").unwrap();
        assert_eq!(args[idx + 1..idx + 5], ["--uid", "1000", "--gid", "1000"]);

        let prelude = args.iter().find(|a| a.starts_with("ulimit")).unwrap();
        assert!(prelude.contains("ulimit -t 20"));
    }

    #[test]
    fn tmpfs_sized_in_bytes() {
        let args = driver().build_args(&spec(), &command()).unwrap();
        let idx = args.iter().position(|a| a == "--size").unwrap();
        assert_eq!(args[idx + 1], (64 * 1024 * 1024).to_string());
        assert_eq!(args[idx + 2], "--tmpfs");
        assert_eq!(args[idx + 3], "/tmp");
    }

    #[test]
    fn empty_command_rejected() {
        let err = driver().build_args(&spec(), &[]).unwrap_err();
        assert!(matches!(err, SandboxError::ConfigInvalid(_)));
    }

    #[test]
    fn relative_scratch_rejected() {
        let mut spec = spec();
        spec.scratch_dir = PathBuf::from("scratch");
        let err = driver().build_args(&spec, &command()).unwrap_err();
        assert!(matches!(err, SandboxError::ConfigInvalid(_)));
    }
}
