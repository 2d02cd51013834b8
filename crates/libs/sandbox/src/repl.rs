//! The REPL executor: drives the framed protocol over an interactive
//! sandbox's stdio.
//!
//! Exactly one request frame goes down stdin; stdout is read until the
//! response end marker or the request's wall-clock budget runs out. A
//! sandbox that times out or breaks framing is never recovered — the
//! caller destroys it and the pool replaces it.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crucible_core::protocol::{self, InterpreterRequest, InterpreterResponse, ResponseAccumulator};
use crucible_core::result::ExecutionOutcome;

use crate::error::{Result, SandboxError};
use crate::files::{self, OutputCaps};
use crate::manager::{ReplSession, Sandbox};

/// Drives framed executions against pre-warmed interactive sandboxes.
#[derive(Debug, Clone)]
pub struct ReplExecutor {
    caps: OutputCaps,
}

impl ReplExecutor {
    /// Create an executor with the given output caps.
    #[must_use]
    pub fn new(caps: OutputCaps) -> Self {
        Self { caps }
    }

    /// Execute `code` in the sandbox's persistent namespace.
    ///
    /// `state` is the snapshot to overlay before execution; when
    /// `capture_state` is set the response carries an updated snapshot.
    /// A wall-clock overrun returns a timed-out outcome; the sandbox must
    /// then be destroyed by the caller (the pool does this on release).
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Unhealthy`] on EOF or malformed framing,
    /// in which case the sandbox is equally unrecoverable.
    pub async fn execute(
        &self,
        sandbox: &mut Sandbox,
        code: &str,
        state: Option<&[u8]>,
        capture_state: bool,
        time_limit: Duration,
    ) -> Result<ExecutionOutcome> {
        let scratch = sandbox.scratch_dir().to_path_buf();
        let before = files::snapshot_scratch(&scratch).await?;

        let request = InterpreterRequest {
            code: code.to_string(),
            state: state.map(|bytes| BASE64.encode(bytes)),
            capture_state,
        };
        let frame = protocol::encode_request(&request)?;

        let session = sandbox
            .repl_mut()
            .ok_or_else(|| SandboxError::Unhealthy("sandbox has no protocol session".to_string()))?;

        session.stdin.write_all(frame.as_bytes()).await?;
        session.stdin.flush().await?;

        let response = match timeout(time_limit, read_response(session)).await {
            Ok(response) => response?,
            Err(_) => {
                warn!(sandbox_id = %sandbox.id(), ?time_limit, "REPL execution timed out");
                return Ok(ExecutionOutcome::timeout(String::new(), String::new()));
            }
        };

        self.assemble_outcome(response, &scratch, &before).await
    }

    async fn assemble_outcome(
        &self,
        response: InterpreterResponse,
        scratch: &Path,
        before: &HashSet<String>,
    ) -> Result<ExecutionOutcome> {
        let mut warnings = Vec::new();

        let (stdout, truncated) = files::truncate_stream(response.stdout, &self.caps);
        if truncated {
            warnings.push("stdout truncated at the configured cap".to_string());
        }
        let (stderr, truncated) = files::truncate_stream(response.stderr, &self.caps);
        if truncated {
            warnings.push("stderr truncated at the configured cap".to_string());
        }

        let state = match response.state {
            Some(encoded) => match BASE64.decode(encoded.as_bytes()) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable state snapshot");
                    warnings.push("updated session state could not be decoded".to_string());
                    None
                }
            },
            None => None,
        };

        if let Some(error) = response.error {
            warnings.push(format!("interpreter server: {error}"));
        }

        // The response's file list is a hint; the scratch scan decides.
        let (collected, file_warnings) =
            files::collect_new_files(scratch, before, &self.caps).await?;
        warnings.extend(file_warnings);
        debug!(
            hinted = response.files.len(),
            collected = collected.len(),
            "Collected REPL output files"
        );

        Ok(ExecutionOutcome::new(stdout, stderr, response.exit_code)
            .with_files(collected)
            .with_state(state)
            .with_warnings(warnings))
    }

    /// Cheap liveness probe: a no-op framed request with a short deadline.
    ///
    /// Returns false when the interpreter is gone or unresponsive; the
    /// caller destroys the sandbox and acquires another.
    pub async fn probe(sandbox: &mut Sandbox, probe_timeout: Duration) -> bool {
        if !sandbox.is_alive() {
            return false;
        }
        let Some(session) = sandbox.repl_mut() else {
            return false;
        };

        let request = InterpreterRequest {
            code: String::new(),
            state: None,
            capture_state: false,
        };
        let Ok(frame) = protocol::encode_request(&request) else {
            return false;
        };
        if session.stdin.write_all(frame.as_bytes()).await.is_err() {
            return false;
        }
        if session.stdin.flush().await.is_err() {
            return false;
        }

        matches!(timeout(probe_timeout, read_response(session)).await, Ok(Ok(_)))
    }
}

/// Read stdout lines until a complete response frame arrives.
async fn read_response(session: &mut ReplSession) -> Result<InterpreterResponse> {
    let mut accumulator = ResponseAccumulator::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = session.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(SandboxError::Unhealthy(
                "interpreter closed stdout before response end".to_string(),
            ));
        }
        if accumulator.feed_line(&line) {
            return accumulator
                .finish()
                .map_err(|e| SandboxError::Unhealthy(format!("malformed response frame: {e}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::BufReader;

    use crucible_core::language::Language;
    use crucible_core::protocol::{RESPONSE_END, RESPONSE_START};

    use super::*;

    /// A sandbox whose "interpreter" is a shell script writing canned
    /// output, enough to exercise the host side of the protocol.
    async fn scripted_sandbox(script: &str) -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let stdin = child.stdin.take().unwrap();
        let reader = BufReader::new(child.stdout.take().unwrap());
        let mut sandbox = Sandbox::stub(Language::Python, dir.path().to_path_buf(), Some(child));
        sandbox.set_repl_for_tests(ReplSession { stdin, reader });
        (dir, sandbox)
    }

    fn canned_response(body: &str) -> String {
        format!("printf '%s\\n' '{RESPONSE_START}' '{body}' '{RESPONSE_END}'; cat >/dev/null")
    }

    #[tokio::test]
    async fn parses_canned_response() {
        let body = r#"{"stdout":"42\n","stderr":"","exit_code":0,"state":null,"files":[]}"#;
        // A file staged before the request is not a produced output.
        let (dir, mut sandbox) = scripted_sandbox(&canned_response(body)).await;
        tokio::fs::write(dir.path().join("input.csv"), b"1,2\n").await.unwrap();

        let executor = ReplExecutor::new(OutputCaps::default());
        let outcome = executor
            .execute(&mut sandbox, "print(40 + 2)", None, false, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.stdout, "42\n");
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.success);
        assert!(outcome.files.is_empty());

        sandbox.destroy().await;
    }

    #[tokio::test]
    async fn state_round_trips_base64() {
        let body = format!(
            r#"{{"stdout":"","stderr":"","exit_code":0,"state":"{}","files":[]}}"#,
            BASE64.encode(b"snapshot-bytes")
        );
        let (_dir, mut sandbox) = scripted_sandbox(&canned_response(&body)).await;

        let executor = ReplExecutor::new(OutputCaps::default());
        let outcome = executor
            .execute(&mut sandbox, "x = 1", Some(b"previous"), true, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(outcome.state.as_deref(), Some(b"snapshot-bytes".as_slice()));
        sandbox.destroy().await;
    }

    #[tokio::test]
    async fn eof_before_end_marker_is_unhealthy() {
        // Consume the request frame first so the write side never sees a
        // broken pipe; then emit half a response and exit.
        let script = format!("head -n 3 >/dev/null; printf '%s\\n' '{RESPONSE_START}' '{{'");
        let (_dir, mut sandbox) = scripted_sandbox(&script).await;

        let executor = ReplExecutor::new(OutputCaps::default());
        let err = executor
            .execute(&mut sandbox, "x", None, false, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::Unhealthy(_)));
        sandbox.destroy().await;
    }

    #[tokio::test]
    async fn deadline_produces_timeout_outcome() {
        let (_dir, mut sandbox) = scripted_sandbox("sleep 30").await;

        let executor = ReplExecutor::new(OutputCaps::default());
        let outcome = executor
            .execute(&mut sandbox, "x", None, false, Duration::from_millis(100))
            .await
            .unwrap();

        assert!(outcome.timed_out);
        assert!(!outcome.success);
        sandbox.destroy().await;
    }

    #[tokio::test]
    async fn probe_fails_on_silent_interpreter() {
        let (_dir, mut sandbox) = scripted_sandbox("sleep 30").await;
        assert!(!ReplExecutor::probe(&mut sandbox, Duration::from_millis(100)).await);
        sandbox.destroy().await;
    }

    #[tokio::test]
    async fn probe_succeeds_on_responsive_interpreter() {
        let body = r#"{"stdout":"","stderr":"","exit_code":0,"files":[]}"#;
        let (_dir, mut sandbox) = scripted_sandbox(&canned_response(body)).await;
        assert!(ReplExecutor::probe(&mut sandbox, Duration::from_secs(5)).await);
        sandbox.destroy().await;
    }
}
