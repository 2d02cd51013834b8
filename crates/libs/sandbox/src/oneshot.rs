//! The one-shot executor: run a single program to completion in a fresh
//! sandbox.
//!
//! Interpreted languages get one spawn (the runner over the staged source);
//! compiled languages get two — compile, then run — inside the same
//! sandbox. Each spawn is a separate isolation-driver invocation with its
//! own wall-clock budget, and output files are whatever appeared in the
//! scratch directory between the pre-run snapshot and process exit.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use crucible_core::language::Toolchain;
use crucible_core::request::ExecutionRequest;
use crucible_core::result::ExecutionOutcome;

use crate::error::{Result, SandboxError};
use crate::files::{self, OutputCaps};
use crate::isolation::{IsolationDriver, IsolationSpec, StdioMode};
use crate::manager::{Sandbox, SandboxManager};

/// Executes non-interactive languages in fresh sandboxes.
#[derive(Debug, Clone)]
pub struct OneShotExecutor {
    caps: OutputCaps,
    compile_time_limit: Duration,
}

impl OneShotExecutor {
    /// Create an executor.
    ///
    /// `compile_time_limit` bounds the compile step separately from the
    /// request's run budget; compilers routinely need more headroom than
    /// the programs they produce.
    #[must_use]
    pub fn new(caps: OutputCaps, compile_time_limit: Duration) -> Self {
        Self {
            caps,
            compile_time_limit,
        }
    }

    /// Stage the request's source, compile if the language needs it, run,
    /// and collect outputs.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ConfigInvalid`] for the interactive
    /// language (it is driven over the framed protocol instead), or
    /// spawn/IO failures from the driver.
    pub async fn execute(
        &self,
        manager: &SandboxManager,
        sandbox: &Sandbox,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        let Some(toolchain) = request.language.toolchain() else {
            return Err(SandboxError::ConfigInvalid(format!(
                "language {} is not one-shot",
                request.language
            )));
        };

        let scratch = sandbox.scratch_dir();
        tokio::fs::write(scratch.join(request.language.source_file()), &request.code).await?;

        let spec = manager.isolation_spec(scratch, request.memory_limit);
        let driver = manager.driver();

        let run_argv = match toolchain {
            Toolchain::Interpreted { run } => run,
            Toolchain::Compiled { compile, run } => {
                let compile_outcome = self
                    .run_step(driver, &spec, &compile, self.compile_time_limit)
                    .await?;
                if compile_outcome.timed_out {
                    warn!(sandbox_id = %sandbox.id(), "Compilation timed out");
                    return Ok(compile_outcome);
                }
                if !compile_outcome.success {
                    debug!(
                        sandbox_id = %sandbox.id(),
                        exit_code = compile_outcome.exit_code,
                        "Compilation failed, skipping run"
                    );
                    return Ok(compile_outcome);
                }
                run
            }
        };

        // Snapshot after staging and compiling, so neither sources nor
        // compile artifacts count as produced files.
        let before = files::snapshot_scratch(scratch).await?;

        let outcome = self
            .run_step(driver, &spec, &run_argv, request.time_limit)
            .await?;

        let (collected, warnings) = files::collect_new_files(scratch, &before, &self.caps).await?;
        Ok(outcome.with_files(collected).with_warnings(warnings))
    }

    /// Spawn one sandboxed process and wait for it under `limit`.
    async fn run_step(
        &self,
        driver: &IsolationDriver,
        spec: &IsolationSpec,
        argv: &[String],
        limit: Duration,
    ) -> Result<ExecutionOutcome> {
        let mut child = driver.spawn(spec, argv, StdioMode::Capture)?;

        // Drain both pipes concurrently with the wait; a program that
        // fills a pipe must never deadlock against its own kill timer.
        let stdout_task = child
            .stdout
            .take()
            .map(|h| tokio::spawn(read_capped(h, self.caps.max_stream_bytes)));
        let stderr_task = child
            .stderr
            .take()
            .map(|h| tokio::spawn(read_capped(h, self.caps.max_stream_bytes)));

        let status = match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed waiting for sandboxed process");
                None
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                let (stdout, _) = join_reader(stdout_task).await;
                let (stderr, _) = join_reader(stderr_task).await;
                return Ok(ExecutionOutcome::timeout(stdout, stderr));
            }
        };

        let (stdout, stdout_truncated) = join_reader(stdout_task).await;
        let (mut stderr, stderr_truncated) = join_reader(stderr_task).await;

        let mut warnings = Vec::new();
        if stdout_truncated {
            warnings.push("stdout truncated at the configured cap".to_string());
        }
        if stderr_truncated {
            warnings.push("stderr truncated at the configured cap".to_string());
        }

        let exit_code = match status {
            Some(status) => {
                let (code, signal) = decompose_status(status);
                if signal == Some(SIGKILL) {
                    stderr.push_str(
                        "\nprocess killed (signal 9): memory or process limit exceeded\n",
                    );
                }
                code
            }
            None => -1,
        };

        Ok(ExecutionOutcome::new(stdout, stderr, exit_code).with_warnings(warnings))
    }
}

/// Exit code plus the terminating signal, if any. Signal deaths map to the
/// conventional `128 + signal` code.
fn decompose_status(status: ExitStatus) -> (i32, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => (code, None),
        None => {
            let signal = status.signal().unwrap_or(-1);
            (128 + signal, Some(signal))
        }
    }
}

const SIGKILL: i32 = 9;

/// Read a pipe to EOF, keeping at most `cap` bytes and draining the rest.
async fn read_capped<R>(reader: R, cap: usize) -> (String, bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut limited = reader.take(cap as u64 + 1);
    let mut buf = Vec::new();
    let _ = limited.read_to_end(&mut buf).await;

    let truncated = buf.len() > cap;
    if truncated {
        buf.truncate(cap);
        // Keep draining so the child never blocks on a full pipe.
        let mut rest = limited.into_inner();
        let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
    }

    (String::from_utf8_lossy(&buf).into_owned(), truncated)
}

async fn join_reader(task: Option<tokio::task::JoinHandle<(String, bool)>>) -> (String, bool) {
    match task {
        Some(task) => task.await.unwrap_or((String::new(), false)),
        None => (String::new(), false),
    }
}
