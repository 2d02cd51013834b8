//! The framed request/response protocol spoken with the interpreter server.
//!
//! Frames are line-delimited: a sentinel marker line, a JSON body, and a
//! closing marker line. Anything outside the markers is interpreter log
//! noise and ignored by readers. The server announces readiness once after
//! warmup with [`READY_MARKER`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opens a request frame.
pub const REQUEST_START: &str = ">>> REQUEST_START <<<";
/// Closes a request frame.
pub const REQUEST_END: &str = ">>> REQUEST_END <<<";
/// Opens a response frame.
pub const RESPONSE_START: &str = ">>> RESPONSE_START <<<";
/// Closes a response frame.
pub const RESPONSE_END: &str = ">>> RESPONSE_END <<<";
/// Emitted once on stdout when warmup imports have completed.
pub const READY_MARKER: &str = ">>> READY <<<";

/// Body of a request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterRequest {
    /// Code to execute in the persistent namespace.
    pub code: String,
    /// Base64 of a compressed snapshot to overlay before executing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Whether to emit an updated snapshot after executing.
    #[serde(default)]
    pub capture_state: bool,
}

/// Body of a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterResponse {
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
    /// 0 on success, non-zero on failure.
    pub exit_code: i32,
    /// Base64 of the updated compressed snapshot, when captured.
    #[serde(default)]
    pub state: Option<String>,
    /// Names of files created under scratch during this call (a hint; the
    /// host-side scan is authoritative).
    #[serde(default)]
    pub files: Vec<String>,
    /// Server-side error description, when the call itself failed.
    #[serde(default)]
    pub error: Option<String>,
}

/// Protocol-level failures while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The body between the markers was not valid JSON of the expected shape.
    #[error("malformed frame body: {0}")]
    Body(#[from] serde_json::Error),

    /// The stream ended before the closing marker arrived.
    #[error("stream ended before {0}")]
    UnexpectedEof(&'static str),
}

/// Encode a request into its framed wire form, trailing newline included.
///
/// # Errors
///
/// Returns an error if the body cannot be serialized.
pub fn encode_request(request: &InterpreterRequest) -> Result<String, ProtocolError> {
    let body = serde_json::to_string(request)?;
    Ok(format!("{REQUEST_START}\n{body}\n{REQUEST_END}\n"))
}

/// Accumulates stdout lines until a complete response frame is seen.
///
/// Lines outside the markers are dropped as log noise. Feed lines one at a
/// time; once [`ResponseAccumulator::feed_line`] returns true, call
/// [`ResponseAccumulator::finish`] to parse the body.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    in_body: bool,
    complete: bool,
    body: String,
}

impl ResponseAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its trailing newline). Returns true once the
    /// closing marker has been consumed.
    pub fn feed_line(&mut self, line: &str) -> bool {
        if self.complete {
            return true;
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if self.in_body {
            if trimmed == RESPONSE_END {
                self.complete = true;
            } else {
                self.body.push_str(trimmed);
                self.body.push('\n');
            }
        } else if trimmed == RESPONSE_START {
            self.in_body = true;
        }
        self.complete
    }

    /// Parse the accumulated body into a response.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnexpectedEof`] when no complete frame was
    /// seen, or a body error when the JSON does not match the schema.
    pub fn finish(self) -> Result<InterpreterResponse, ProtocolError> {
        if !self.complete {
            return Err(ProtocolError::UnexpectedEof(RESPONSE_END));
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn feed(accumulator: &mut ResponseAccumulator, raw: &str) -> bool {
        raw.lines().any(|line| accumulator.feed_line(line))
    }

    #[test]
    fn request_frame_shape() {
        let frame = encode_request(&InterpreterRequest {
            code: "x = 1".to_string(),
            state: None,
            capture_state: true,
        })
        .unwrap();

        let lines: Vec<&str> = frame.lines().collect();
        assert_eq!(lines[0], REQUEST_START);
        assert_eq!(lines[2], REQUEST_END);
        let body: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(body["code"], "x = 1");
        assert_eq!(body["capture_state"], true);
        assert!(body.get("state").is_none());
    }

    #[test]
    fn response_round_trip() {
        let raw = format!(
            "{RESPONSE_START}\n{}\n{RESPONSE_END}",
            r#"{"stdout":"42\n","stderr":"","exit_code":0,"state":null,"files":["out.txt"],"error":null}"#
        );

        let mut acc = ResponseAccumulator::new();
        assert!(feed(&mut acc, &raw));
        let response = acc.finish().unwrap();
        assert_eq!(response.stdout, "42\n");
        assert_eq!(response.exit_code, 0);
        assert_eq!(response.files, vec!["out.txt"]);
        assert!(response.state.is_none());
    }

    #[test]
    fn noise_outside_markers_ignored() {
        let raw = format!(
            "library warning: deprecated\n{RESPONSE_START}\n{}\n{RESPONSE_END}\ntrailing noise",
            r#"{"stdout":"","stderr":"","exit_code":1,"files":[]}"#
        );

        let mut acc = ResponseAccumulator::new();
        assert!(feed(&mut acc, &raw));
        let response = acc.finish().unwrap();
        assert_eq!(response.exit_code, 1);
        assert_eq!(response.stderr, "");
    }

    #[test]
    fn incomplete_frame_is_eof() {
        let raw = format!("{RESPONSE_START}\n{{\"exit_code\":0}}");
        let mut acc = ResponseAccumulator::new();
        assert!(!feed(&mut acc, &raw));
        assert!(matches!(
            acc.finish(),
            Err(ProtocolError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn garbage_body_is_a_body_error() {
        let raw = format!("{RESPONSE_START}\nnot json\n{RESPONSE_END}");
        let mut acc = ResponseAccumulator::new();
        assert!(feed(&mut acc, &raw));
        assert!(matches!(acc.finish(), Err(ProtocolError::Body(_))));
    }
}
