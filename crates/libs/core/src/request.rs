//! Execution requests and their validation bounds.

use std::time::Duration;

use thiserror::Error;

use crate::language::Language;

/// Where an input file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Bytes supplied inline with the request.
    Inline(Vec<u8>),
    /// A `{sessionId}/{fileId}` reference into the blob store.
    Reference(String),
}

/// A file staged into the sandbox scratch directory before execution.
#[derive(Debug, Clone)]
pub struct InputFile {
    /// File name, relative to the scratch root.
    pub name: String,
    /// The file's content or a reference to it.
    pub source: FileSource,
}

/// One execution request, created per API call and consumed once.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Language to execute.
    pub language: Language,
    /// Source code, bounded UTF-8.
    pub code: String,
    /// Session identifier; absent means a fresh session.
    pub session_id: Option<String>,
    /// Files staged into scratch before execution.
    pub input_files: Vec<InputFile>,
    /// Whether to capture an updated state snapshot (interactive only).
    pub capture_state: bool,
    /// Wall-clock limit for the run step.
    pub time_limit: Duration,
    /// Memory limit in bytes.
    pub memory_limit: u64,
}

/// Envelope a request must fit inside to be accepted.
#[derive(Debug, Clone)]
pub struct RequestBounds {
    /// Maximum code size in bytes.
    pub max_code_bytes: usize,
    /// Maximum wall-clock limit a request may ask for.
    pub max_time_limit: Duration,
    /// Maximum memory limit a request may ask for.
    pub max_memory_bytes: u64,
    /// Maximum number of input files.
    pub max_input_files: usize,
    /// Maximum size of a single inline input file.
    pub max_input_file_bytes: usize,
}

impl Default for RequestBounds {
    fn default() -> Self {
        Self {
            max_code_bytes: 1024 * 1024,
            max_time_limit: Duration::from_secs(120),
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            max_input_files: 16,
            max_input_file_bytes: 32 * 1024 * 1024,
        }
    }
}

/// A request violated its validation bounds.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Code exceeds the configured size cap.
    #[error("code is {actual} bytes, limit is {max}")]
    CodeTooLarge {
        /// Submitted size.
        actual: usize,
        /// Configured cap.
        max: usize,
    },

    /// The requested time limit is zero or above the envelope.
    #[error("time limit {0:?} is outside the allowed envelope")]
    TimeLimitOutOfRange(Duration),

    /// The requested memory limit is zero or above the envelope.
    #[error("memory limit {0} bytes is outside the allowed envelope")]
    MemoryLimitOutOfRange(u64),

    /// Too many input files attached.
    #[error("{actual} input files attached, limit is {max}")]
    TooManyInputFiles {
        /// Attached count.
        actual: usize,
        /// Configured cap.
        max: usize,
    },

    /// An inline input file exceeds the per-file size cap.
    #[error("input file {name:?} is too large")]
    InputFileTooLarge {
        /// Offending file name.
        name: String,
    },

    /// A file name contains path separators or other rejected characters.
    #[error("unsafe file name {0:?}")]
    UnsafeFileName(String),

    /// A session identifier contains rejected characters.
    #[error("invalid session id {0:?}")]
    InvalidSessionId(String),
}

/// Returns true if `name` is acceptable as a scratch-relative file name.
///
/// Path separators, parent references, leading dots, and control characters
/// are all rejected; the name must be non-empty and reasonably short.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name != ".."
        && !name.chars().any(char::is_control)
}

/// Returns true if `id` is acceptable as a session identifier.
pub fn is_safe_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ExecutionRequest {
    /// Validate this request against `bounds`.
    ///
    /// Validation happens before any resource is touched; a violation maps
    /// to a fail-fast `BadRequest` at the HTTP surface.
    ///
    /// # Errors
    ///
    /// Returns the first bound the request violates.
    pub fn validate(&self, bounds: &RequestBounds) -> Result<(), ValidationError> {
        if self.code.len() > bounds.max_code_bytes {
            return Err(ValidationError::CodeTooLarge {
                actual: self.code.len(),
                max: bounds.max_code_bytes,
            });
        }

        if self.time_limit.is_zero() || self.time_limit > bounds.max_time_limit {
            return Err(ValidationError::TimeLimitOutOfRange(self.time_limit));
        }

        if self.memory_limit == 0 || self.memory_limit > bounds.max_memory_bytes {
            return Err(ValidationError::MemoryLimitOutOfRange(self.memory_limit));
        }

        if self.input_files.len() > bounds.max_input_files {
            return Err(ValidationError::TooManyInputFiles {
                actual: self.input_files.len(),
                max: bounds.max_input_files,
            });
        }

        for file in &self.input_files {
            if !is_safe_file_name(&file.name) {
                return Err(ValidationError::UnsafeFileName(file.name.clone()));
            }
            if let FileSource::Inline(bytes) = &file.source {
                if bytes.len() > bounds.max_input_file_bytes {
                    return Err(ValidationError::InputFileTooLarge {
                        name: file.name.clone(),
                    });
                }
            }
        }

        if let Some(id) = &self.session_id {
            if !is_safe_session_id(id) {
                return Err(ValidationError::InvalidSessionId(id.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            language: Language::Python,
            code: "print('hi')".to_string(),
            session_id: None,
            input_files: Vec::new(),
            capture_state: false,
            time_limit: Duration::from_secs(10),
            memory_limit: 512 * 1024 * 1024,
        }
    }

    #[test]
    fn valid_request_passes() {
        request().validate(&RequestBounds::default()).unwrap();
    }

    #[test]
    fn oversized_code_rejected() {
        let mut req = request();
        req.code = "x".repeat(2 * 1024 * 1024);
        let err = req.validate(&RequestBounds::default()).unwrap_err();
        assert!(matches!(err, ValidationError::CodeTooLarge { .. }));
    }

    #[test]
    fn zero_time_limit_rejected() {
        let mut req = request();
        req.time_limit = Duration::ZERO;
        let err = req.validate(&RequestBounds::default()).unwrap_err();
        assert!(matches!(err, ValidationError::TimeLimitOutOfRange(_)));
    }

    #[test]
    fn excessive_time_limit_rejected() {
        let mut req = request();
        req.time_limit = Duration::from_secs(3600);
        let err = req.validate(&RequestBounds::default()).unwrap_err();
        assert!(matches!(err, ValidationError::TimeLimitOutOfRange(_)));
    }

    #[test]
    fn path_traversal_file_name_rejected() {
        let mut req = request();
        req.input_files.push(InputFile {
            name: "../etc/passwd".to_string(),
            source: FileSource::Inline(vec![]),
        });
        let err = req.validate(&RequestBounds::default()).unwrap_err();
        assert!(matches!(err, ValidationError::UnsafeFileName(_)));
    }

    #[test]
    fn hidden_file_name_rejected() {
        assert!(!is_safe_file_name(".bashrc"));
        assert!(!is_safe_file_name(""));
        assert!(is_safe_file_name("data.csv"));
        assert!(is_safe_file_name("plot_1.png"));
    }

    #[test]
    fn malformed_session_id_rejected() {
        let mut req = request();
        req.session_id = Some("s1/../../other".to_string());
        let err = req.validate(&RequestBounds::default()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSessionId(_)));
    }
}
