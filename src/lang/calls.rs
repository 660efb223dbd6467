//! Text-channel call correlation registry.
//!
//! Evaluation requests are written to the interpreter's stdin as a single
//! escaped invocation line tagged with a fresh UUID. Responses come back
//! through the marker protocol recognized by the scanner:
//! `START` declares the response type, `CHUNK` lines carry the body,
//! `END` finalizes and resolves or rejects the pending future. `CAPTURE`
//! markers bracket side-channel prints that the scanner already surfaces
//! as plain output, so they are only stripped here.
//!
//! Marker id `"0"` is reserved for out-of-band notifications; issued ids
//! are UUID v4 values and can never collide with it.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EvaluationFailure, SessionError, SessionResult};
use crate::lang::scanner::{MarkerKind, MarkerLine};
use crate::lang::session::SessionEvent;

/// Reserved marker id carrying out-of-band notifications.
pub const OUT_OF_BAND_ID: &str = "0";

/// Response type declared by a successful evaluation.
const RESULT_TYPE: &str = "Result";

/// Response type declared for syntax failures.
const SYNTAX_ERROR_TYPE: &str = "SyntaxError";

static SYNTAX_DETAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"line (\d+) char (\d+)").unwrap());

struct ResponseAccumulator {
    declared_type: String,
    chunks: Vec<String>,
}

/// Correlation registry for evaluation requests over the interpreter's
/// stdin/stdout stream.
///
/// The registry is safe to share: the pending map is mutated under a
/// single mutex, so resolution of one call cannot race registration of
/// another. The interpreter itself services requests strictly in the
/// order it consumes its input stream.
pub struct CallRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<SessionResult<Value>>>>,
    accumulators: Mutex<HashMap<String, ResponseAccumulator>>,
    stdin: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl CallRegistry {
    pub(crate) fn new(
        stdin: mpsc::UnboundedSender<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            accumulators: Mutex::new(HashMap::new()),
            stdin,
            events,
        }
    }

    /// Submit source text for evaluation; returns the pending future
    /// immediately.
    ///
    /// The source is escaped into a single-line form and written as an
    /// invocation statement referencing a fresh id. Resolution happens
    /// asynchronously when the matching `END` marker is ingested.
    pub fn submit(&self, code: &str) -> oneshot::Receiver<SessionResult<Value>> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let statement = invocation(&id, code);
        if self.stdin.send(statement).is_err() {
            warn!(%id, "interpreter stdin is gone, rejecting call");
            if let Some(tx) = self.pending.lock().remove(&id) {
                let _ = tx.send(Err(SessionError::Terminated));
            }
        }
        rx
    }

    /// Number of calls still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Route one recognized marker line.
    pub(crate) fn handle_marker(&self, marker: MarkerLine) {
        match marker.kind {
            MarkerKind::Start => {
                self.accumulators.lock().insert(
                    marker.id,
                    ResponseAccumulator {
                        declared_type: marker.body,
                        chunks: Vec::new(),
                    },
                );
            }
            MarkerKind::Chunk => {
                let mut accumulators = self.accumulators.lock();
                match accumulators.get_mut(&marker.id) {
                    Some(acc) => acc.chunks.push(marker.body),
                    None => warn!(id = %marker.id, "chunk marker without a start"),
                }
            }
            MarkerKind::End => self.finish(&marker.id, marker.body),
            MarkerKind::CaptureStart | MarkerKind::CaptureEnd => {
                debug!(id = %marker.id, "capture region boundary");
            }
        }
    }

    fn finish(&self, id: &str, end_body: String) {
        let accumulator = self.accumulators.lock().remove(id);
        let (declared_type, raw) = match accumulator {
            Some(acc) => (acc.declared_type, acc.chunks.concat()),
            None => (RESULT_TYPE.to_string(), end_body),
        };
        let payload =
            serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));

        let Some(tx) = self.pending.lock().remove(id) else {
            if id != OUT_OF_BAND_ID {
                warn!(%id, "response for unknown correlation id");
            }
            let _ = self.events.send(SessionEvent::OutOfBand {
                id: id.to_string(),
                payload,
            });
            return;
        };

        let outcome = if declared_type == RESULT_TYPE {
            Ok(payload)
        } else {
            Err(SessionError::Evaluation(Box::new(failure_from(
                &declared_type,
                &raw,
                &payload,
            ))))
        };
        let _ = tx.send(outcome);
    }

    /// Reject every pending call; used on compile failure, boot timeout,
    /// and session termination.
    pub(crate) fn reject_all(&self, err: &SessionError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(count = drained.len(), "rejecting pending interpreter calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(err.clone()));
        }
        self.accumulators.lock().clear();
    }
}

/// Escape source into a single-line form the interpreter-side receiver
/// reverses: line breaks become `__NL__`, backslashes `__SLASH__`, and
/// double quotes gain a backslash.
fn escape_source(code: &str) -> String {
    code.replace(['\n', '\r'], "__NL__")
        .replace('\\', "__SLASH__")
        .replace('"', "\\\"")
}

/// The invocation statement written to stdin. The trailing form feed
/// tells the interpreter to evaluate the buffered line.
fn invocation(id: &str, code: &str) -> String {
    let escaped = escape_source(code);
    format!(
        "Library.at(\\supercolliderjs, \\interpret).value(\"{id}\", \"{escaped}\");\n\u{000c}"
    )
}

fn failure_from(declared_type: &str, raw: &str, payload: &Value) -> EvaluationFailure {
    let message = payload
        .get("errorString")
        .and_then(Value::as_str)
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| declared_type.to_string());
    let file = payload
        .get("file")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mut line = payload.get("line").and_then(Value::as_u64).map(|n| n as u32);
    let mut char_pos = payload
        .get("charPos")
        .and_then(Value::as_u64)
        .map(|n| n as u32);

    if declared_type == SYNTAX_ERROR_TYPE && (line.is_none() || char_pos.is_none()) {
        if let Some(caps) = SYNTAX_DETAIL.captures(raw) {
            line = line.or_else(|| caps[1].parse().ok());
            char_pos = char_pos.or_else(|| caps[2].parse().ok());
        }
    }

    EvaluationFailure {
        error_type: declared_type.to_string(),
        message,
        file,
        line,
        char_pos,
        raw: raw.to_string(),
    }
}
