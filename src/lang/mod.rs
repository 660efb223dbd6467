//! Interpreter-side protocol: output scanning, session lifecycle, and the
//! text-channel call registry.
//!
//! The interpreter exposes no framing or correlation of its own; this
//! module imposes both onto its stdin/stdout stream. Inbound text flows
//! through the [`scanner`], which classifies it against the current
//! [`session::SessionState`]; recognized marker lines feed the
//! [`calls::CallRegistry`], which resolves pending evaluation futures.

pub mod calls;
pub mod diagnostics;
pub mod scanner;
pub mod session;

pub use calls::CallRegistry;
pub use diagnostics::CompileDiagnostics;
pub use session::{SclangSession, SessionConfig, SessionEvent, SessionState};
