//! Incremental pattern scanner for interpreter output.
//!
//! Each lifecycle state carries an ordered table of handlers. A chunk is
//! matched against the handlers of the current state only; the earliest
//! match wins (handler order breaks ties), its text is consumed, and the
//! remainder is re-scanned under the state the match leads to. Several
//! transitions can therefore cascade within a single chunk. Text no
//! handler claims surfaces as plain output, except while compiling, where
//! it is captured for later diagnostics extraction.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::lang::session::SessionState;

/// Fixed literal distinguishing protocol marker lines from program output.
pub const MARKER_SENTINEL: &str = "SUPERCOLLIDERJS";

static COMPILE_STARTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^compiling class library").unwrap());
static COMPILE_DONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^compile done").unwrap());
static WELCOME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\*\*\* Welcome to SuperCollider ([0-9A-Za-z.\-]+?)\.? \*\*\*").unwrap()
});
static NOT_COMPILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Library has not been compiled successfully").unwrap());
static DISCREPANCY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^There is a discrepancy\.").unwrap());
static PARSE_FAILED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^ERROR: There is an error parsing").unwrap());
static PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*sc3>\s*$").unwrap());
static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^SUPERCOLLIDERJS:([0-9A-Za-z\-]+):(START|CHUNK|END|CAPTURE):(.*)$").unwrap()
});

/// What a recognized pattern means for the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerKind {
    CompileStarted,
    CompileDone,
    Welcome,
    CompileFailed,
    Prompt,
    Marker,
}

struct Handler {
    regex: &'static Lazy<Regex>,
    kind: HandlerKind,
}

const fn handler(regex: &'static Lazy<Regex>, kind: HandlerKind) -> Handler {
    Handler { regex, kind }
}

fn handlers_for(state: SessionState) -> &'static [Handler] {
    use HandlerKind::*;
    static BOOTING: &[Handler] = &[handler(&COMPILE_STARTED, CompileStarted)];
    static COMPILING: &[Handler] = &[
        handler(&COMPILE_DONE, CompileDone),
        handler(&WELCOME, Welcome),
        handler(&NOT_COMPILED, CompileFailed),
        handler(&DISCREPANCY, CompileFailed),
        handler(&PARSE_FAILED, CompileFailed),
        handler(&PROMPT, Prompt),
    ];
    static COMPILED: &[Handler] = &[handler(&WELCOME, Welcome), handler(&PROMPT, Prompt)];
    static COMPILE_ERROR: &[Handler] = &[handler(&COMPILE_STARTED, CompileStarted)];
    static READY: &[Handler] = &[
        handler(&MARKER, Marker),
        handler(&COMPILE_STARTED, CompileStarted),
    ];

    match state {
        SessionState::Uninitialized => &[],
        SessionState::Booting => BOOTING,
        SessionState::Compiling => COMPILING,
        SessionState::Compiled => COMPILED,
        SessionState::CompileError => COMPILE_ERROR,
        SessionState::Ready => READY,
    }
}

/// Kind of a recognized marker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// Begin collecting a response; the body declares its type
    Start,
    /// Append the body to the response accumulator
    Chunk,
    /// Finalize and correlate the accumulated response
    End,
    /// Begin a region of echoed display output
    CaptureStart,
    /// End a region of echoed display output
    CaptureEnd,
}

/// One parsed `SENTINEL:id:KIND:body` line.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerLine {
    /// Correlation id the marker belongs to
    pub id: String,
    /// Marker kind
    pub kind: MarkerKind,
    /// Kind-specific body text
    pub body: String,
}

/// A classified piece of interpreter output.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// `compiling class library` seen; diagnostics must reset
    CompileStarted,
    /// `compile done` seen
    CompileDone,
    /// Welcome banner with its version token
    Welcome {
        /// Version string captured from the banner
        version: String,
    },
    /// A compile-failure banner, or a bare prompt while compiling
    CompileFailed,
    /// A bare prompt after a successful compile
    Prompt,
    /// A protocol marker line
    Marker(MarkerLine),
    /// Text surfaced verbatim for display
    Plain(String),
    /// Text captured into the compile diagnostics accumulator
    Raw(String),
}

/// Scan a chunk of interpreter output starting from `state`.
///
/// Appends classified events to `events` in stream order and returns the
/// state the machine ends in after all cascaded transitions.
pub fn scan(state: SessionState, text: &str, events: &mut Vec<ScanEvent>) -> SessionState {
    let mut state = state;
    let mut rest = text;

    loop {
        if rest.is_empty() {
            return state;
        }

        let handlers = handlers_for(state);
        let mut best: Option<(usize, usize, HandlerKind, regex::Captures<'_>)> = None;
        for h in handlers {
            if let Some(caps) = h.regex.captures(rest) {
                let m = caps.get(0).expect("regex match has group 0");
                let better = match &best {
                    Some((start, ..)) => m.start() < *start,
                    None => true,
                };
                if better {
                    best = Some((m.start(), m.end(), h.kind, caps));
                }
            }
        }

        let Some((start, end, kind, caps)) = best else {
            emit_unclaimed(state, rest, events);
            return state;
        };

        if start > 0 {
            emit_unclaimed(state, &rest[..start], events);
        }

        let event = match kind {
            HandlerKind::CompileStarted => ScanEvent::CompileStarted,
            HandlerKind::CompileDone => ScanEvent::CompileDone,
            HandlerKind::Welcome => ScanEvent::Welcome {
                version: caps[1].to_string(),
            },
            HandlerKind::CompileFailed => ScanEvent::CompileFailed,
            HandlerKind::Prompt => {
                if state == SessionState::Compiling {
                    ScanEvent::CompileFailed
                } else {
                    ScanEvent::Prompt
                }
            }
            HandlerKind::Marker => match parse_marker(&caps) {
                Some(marker) => ScanEvent::Marker(marker),
                None => ScanEvent::Plain(caps[0].to_string()),
            },
        };

        state = next_state(state, &event);
        events.push(event);
        rest = &rest[end..];
    }
}

fn emit_unclaimed(state: SessionState, text: &str, events: &mut Vec<ScanEvent>) {
    // compile output is captured verbatim; blank lines separate error
    // blocks and must survive into the diagnostics accumulator
    if state == SessionState::Compiling {
        events.push(ScanEvent::Raw(text.to_string()));
        return;
    }
    if text.trim().is_empty() {
        return;
    }
    events.push(ScanEvent::Plain(text.to_string()));
}

fn next_state(state: SessionState, event: &ScanEvent) -> SessionState {
    match event {
        ScanEvent::CompileStarted => SessionState::Compiling,
        ScanEvent::CompileDone => SessionState::Compiled,
        ScanEvent::Welcome { .. } => SessionState::Ready,
        ScanEvent::CompileFailed => SessionState::CompileError,
        ScanEvent::Prompt => SessionState::Ready,
        _ => state,
    }
}

fn parse_marker(caps: &regex::Captures<'_>) -> Option<MarkerLine> {
    let id = caps[1].to_string();
    let body = caps[3].to_string();
    let kind = match &caps[2] {
        "START" => MarkerKind::Start,
        "CHUNK" => MarkerKind::Chunk,
        "END" => MarkerKind::End,
        "CAPTURE" => match body.as_str() {
            "START" => MarkerKind::CaptureStart,
            "END" => MarkerKind::CaptureEnd,
            _ => return None,
        },
        _ => return None,
    };
    Some(MarkerLine { id, kind, body })
}
