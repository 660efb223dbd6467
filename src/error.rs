//! Error types for the scbridge protocol layer
//!
//! Errors are layered per protocol domain: the wire codec surfaces its
//! failures synchronously, while session and RPC errors travel through
//! the pending-call futures they belong to.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lang::diagnostics::CompileDiagnostics;
use crate::lang::session::SessionState;

/// Errors produced by the OSC wire codec.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WireError {
    /// Bytes do not match the expected packet shape
    #[error("malformed packet: {0}")]
    MalformedProtocol(String),

    /// A value cannot be represented in the wire encoding
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No codec mapping exists for the value or type tag
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
}

/// Convenience result alias for codec operations
pub type WireResult<T> = std::result::Result<T, WireError>;

/// Structured detail for a failed interpreter evaluation.
///
/// `line`/`char_pos` are populated for syntax failures when the detail can
/// be recovered from the diagnostic text; `raw` always carries the
/// untouched response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvaluationFailure {
    /// Error kind as declared by the interpreter (e.g. `Error`, `SyntaxError`)
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Source file, when reported
    pub file: Option<String>,
    /// Line number, when derivable
    pub line: Option<u32>,
    /// Character position within the line, when derivable
    pub char_pos: Option<u32>,
    /// Raw response body as received
    pub raw: String,
}

impl fmt::Display for EvaluationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)?;
        if let (Some(line), Some(char_pos)) = (self.line, self.char_pos) {
            write!(f, " (line {line} char {char_pos})")?;
        }
        Ok(())
    }
}

/// Failures of an interpreter session or of calls routed through it.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The class library failed to compile
    #[error("class library failed to compile")]
    Compile(Box<CompileDiagnostics>),

    /// An evaluation produced a runtime or syntax error
    #[error("evaluation failed: {0}")]
    Evaluation(Box<EvaluationFailure>),

    /// The interpreter did not reach a ready state in time
    #[error("interpreter did not become ready within {0:?}")]
    BootTimeout(Duration),

    /// The interpreter process went away while calls were pending
    #[error("interpreter session terminated")]
    Terminated,

    /// A call was issued while the session was not ready
    #[error("interpreter not ready (state {0:?})")]
    NotReady(SessionState),
}

/// Convenience result alias for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Failures of the datagram-channel call registry.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Outgoing message could not be encoded
    #[error("encode failed: {0}")]
    Wire(#[from] WireError),

    /// The server answered on an error address
    #[error("server error reply at {address}: {message}")]
    ErrorReply {
        /// Reply address the error arrived on
        address: String,
        /// Error text reported by the server
        message: String,
    },

    /// The outbound datagram channel is gone
    #[error("datagram channel closed")]
    ChannelClosed,

    /// The registry was shut down while the call was pending
    #[error("rpc registry shut down")]
    Shutdown,
}

/// Convenience result alias for datagram-channel calls
pub type RpcResult<T> = std::result::Result<T, RpcError>;
