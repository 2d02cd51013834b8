//! Execution results collected from a sandbox.

/// A file produced by the user program during execution.
#[derive(Debug, Clone)]
pub struct OutputFile {
    /// File name, relative to the scratch root.
    pub name: String,
    /// The file's bytes; empty when `truncated` is set.
    pub content: Vec<u8>,
    /// True when the file exceeded the per-file size cap and its content
    /// was withheld.
    pub truncated: bool,
}

/// The outcome of one execution, immutable after construction.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Captured standard output, bounded.
    pub stdout: String,
    /// Captured standard error, bounded.
    pub stderr: String,
    /// Exit code of the user program.
    pub exit_code: i32,
    /// Whether the execution succeeded (exit code 0, no timeout).
    pub success: bool,
    /// Whether the execution was killed for exceeding its wall-clock limit.
    pub timed_out: bool,
    /// Files produced under the scratch directory during this execution.
    pub files: Vec<OutputFile>,
    /// Updated session snapshot, when one was captured.
    pub state: Option<Vec<u8>>,
    /// Non-fatal notes attached during collection (truncated streams,
    /// withheld files, skipped snapshot entries).
    pub warnings: Vec<String>,
}

impl ExecutionOutcome {
    /// Create an outcome for a process that ran to completion.
    #[must_use]
    pub fn new(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
            timed_out: false,
            files: Vec::new(),
            state: None,
            warnings: Vec::new(),
        }
    }

    /// Create an outcome for a timed-out execution.
    #[must_use]
    pub fn timeout(stdout: String, stderr: String) -> Self {
        Self {
            stdout,
            stderr,
            exit_code: -1,
            success: false,
            timed_out: true,
            files: Vec::new(),
            state: None,
            warnings: Vec::new(),
        }
    }

    /// Attach produced files.
    #[must_use]
    pub fn with_files(mut self, files: Vec<OutputFile>) -> Self {
        self.files = files;
        self
    }

    /// Attach a captured state snapshot.
    #[must_use]
    pub fn with_state(mut self, state: Option<Vec<u8>>) -> Self {
        self.state = state;
        self
    }

    /// Append collection warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    /// A short failure description, or `None` for successful executions.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }
        if self.timed_out {
            return Some("Execution timed out".to_string());
        }
        if self.stderr.is_empty() {
            Some(format!("Program exited with code {}", self.exit_code))
        } else {
            Some(self.stderr.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_has_no_error_message() {
        let outcome = ExecutionOutcome::new("42\n".to_string(), String::new(), 0);
        assert!(outcome.success);
        assert_eq!(outcome.error_message(), None);
    }

    #[test]
    fn timeout_outcome() {
        let outcome = ExecutionOutcome::timeout(String::new(), String::new());
        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert_eq!(outcome.error_message().unwrap(), "Execution timed out");
    }

    #[test]
    fn nonzero_exit_without_stderr_reports_code() {
        let outcome = ExecutionOutcome::new(String::new(), String::new(), 3);
        assert_eq!(
            outcome.error_message().unwrap(),
            "Program exited with code 3"
        );
    }
}
