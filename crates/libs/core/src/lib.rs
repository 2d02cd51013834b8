//! Core types for the Crucible code-execution service.
//!
//! This crate holds everything the sandbox layer and the HTTP service share:
//! the language registry, execution request/result models, and the framed
//! stdio protocol spoken with the in-sandbox interpreter server.

pub mod language;
pub mod protocol;
pub mod request;
pub mod result;

pub use language::{Language, Toolchain};
pub use protocol::{InterpreterRequest, InterpreterResponse};
pub use request::{ExecutionRequest, FileSource, InputFile, RequestBounds};
pub use result::{ExecutionOutcome, OutputFile};
