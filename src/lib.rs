//! scbridge – protocol layer for the SuperCollider language interpreter
//! and synthesis server
//!
//! This crate implements the two request/response protocols a client
//! needs to drive a SuperCollider-style setup:
//! - The OSC wire codec and the datagram-channel call registry for the
//!   synthesis server, including payload fragmentation and out-of-order
//!   reassembly
//! - The stdout scanner, session lifecycle state machine, compile
//!   diagnostics, and text-channel call registry for the interpreter's
//!   stdin/stdout stream
//!
//! Process spawning, configuration resolution, and terminal output are
//! external collaborators; they talk to this crate through channels of
//! raw bytes and text.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod lang;
pub mod osc;
pub mod synth;

// Re-export key types for convenience
pub use error::{EvaluationFailure, RpcError, SessionError, WireError};
pub use lang::{CompileDiagnostics, SclangSession, SessionConfig, SessionEvent, SessionState};
pub use osc::{OscBundle, OscMessage, OscPacket, OscValue, TimeTag};
pub use synth::{RpcClient, RpcConfig};

/// Current version of the scbridge crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
