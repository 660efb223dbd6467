//! Interpreter session lifecycle.
//!
//! [`SclangSession`] owns the lifecycle state machine, the compile
//! diagnostics for the current pass, and the text-channel call registry.
//! Inbound stdout chunks are pushed through [`ingest`](SclangSession::ingest);
//! classified events drive transitions, diagnostics, and call resolution.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::lang::calls::CallRegistry;
use crate::lang::diagnostics::CompileDiagnostics;
use crate::lang::scanner::{self, ScanEvent};

/// Lifecycle states of one interpreter session.
///
/// Transitions are driven only by scanner matches (plus the explicit boot
/// trigger); unmatched text never changes state. The machine cycles, so
/// no state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No interpreter process associated yet
    Uninitialized,
    /// Boot requested, waiting for the compiler to start
    Booting,
    /// Class library compiling; output is being captured
    Compiling,
    /// Compile finished, waiting for the interpreter to settle
    Compiled,
    /// Class library failed to compile
    CompileError,
    /// Interpreter accepting evaluation requests
    Ready,
}

/// Events surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The lifecycle state changed
    StateChanged(SessionState),
    /// Ordinary display output not claimed by any protocol handler
    PlainOutput(String),
    /// A response arrived for no pending call (id `0` is the reserved
    /// out-of-band channel)
    OutOfBand {
        /// Correlation id the response carried
        id: String,
        /// Parsed response payload
        payload: serde_json::Value,
    },
}

/// Tunables for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long boot may take before the session is forced into
    /// [`SessionState::CompileError`]
    pub boot_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boot_timeout: Duration::from_secs(30),
        }
    }
}

/// One interpreter session from boot to termination.
///
/// Cloning shares the underlying session; all methods take `&self` and
/// serialize access internally.
#[derive(Clone)]
pub struct SclangSession {
    inner: Arc<Mutex<Inner>>,
    calls: Arc<CallRegistry>,
    config: SessionConfig,
}

struct Inner {
    state: SessionState,
    diagnostics: CompileDiagnostics,
    last_compile: Option<CompileDiagnostics>,
    boot_waiters: Vec<oneshot::Sender<SessionResult<()>>>,
    // bumped whenever boot waiters settle; a timer armed under an older
    // epoch must no-op instead of firing into a later compile pass
    boot_epoch: u64,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SclangSession {
    /// Create a session writing interpreter input lines to `stdin`.
    ///
    /// Returns the session and the upward event stream. The process
    /// lifecycle collaborator owns the other end of `stdin` and feeds
    /// stdout chunks back through [`ingest`](Self::ingest).
    pub fn new(
        config: SessionConfig,
        stdin: mpsc::UnboundedSender<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let calls = Arc::new(CallRegistry::new(stdin, events_tx.clone()));
        let session = Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Uninitialized,
                diagnostics: CompileDiagnostics::default(),
                last_compile: None,
                boot_waiters: Vec::new(),
                boot_epoch: 0,
                events: events_tx,
            })),
            calls,
            config,
        };
        (session, events_rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Diagnostics of the most recently finalized compile pass.
    pub fn last_compile(&self) -> Option<CompileDiagnostics> {
        self.inner.lock().last_compile.clone()
    }

    /// The text-channel call registry backing [`interpret`](Self::interpret).
    pub fn registry(&self) -> Arc<CallRegistry> {
        Arc::clone(&self.calls)
    }

    /// Mark the boot trigger and wait for the session to become ready.
    ///
    /// The external collaborator spawns the process; this call records the
    /// transition into [`SessionState::Booting`], arms the mandatory boot
    /// timeout, and resolves once the scanner reports ready, or fails on
    /// compile error, timeout, or termination.
    pub async fn boot(&self) -> SessionResult<()> {
        let (rx, epoch) = {
            let mut inner = self.inner.lock();
            inner.diagnostics = CompileDiagnostics::default();
            inner.transition(SessionState::Booting);
            let (tx, rx) = oneshot::channel();
            inner.boot_waiters.push(tx);
            (rx, inner.boot_epoch)
        };
        self.arm_boot_timeout(epoch);
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Terminated),
        }
    }

    fn arm_boot_timeout(&self, epoch: u64) {
        let inner = Arc::downgrade(&self.inner);
        let calls = Arc::clone(&self.calls);
        let timeout = self.config.boot_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = inner.upgrade() else { return };
            let mut inner = inner.lock();
            // the boot this timer belongs to has already settled
            if inner.boot_epoch != epoch {
                return;
            }
            warn!(?timeout, "interpreter did not become ready in time");
            inner.seal_diagnostics();
            inner.transition(SessionState::CompileError);
            inner.drain_boot_waiters(&SessionError::BootTimeout(timeout));
            calls.reject_all(&SessionError::BootTimeout(timeout));
        });
    }

    /// Feed a chunk of interpreter stdout through the scanner and apply
    /// every classified event in stream order.
    pub fn ingest(&self, chunk: &str) {
        let mut events = Vec::new();
        let mut inner = self.inner.lock();
        scanner::scan(inner.state, chunk, &mut events);
        for event in events {
            inner.apply(event, &self.calls);
        }
    }

    /// Evaluate source text in the interpreter and return its structured
    /// result.
    pub async fn interpret(&self, code: &str) -> SessionResult<serde_json::Value> {
        // registration happens under the state lock, so a concurrent
        // compile failure or terminate cannot reject-all in between and
        // leave this call pending forever
        let rx = {
            let inner = self.inner.lock();
            if inner.state != SessionState::Ready {
                return Err(SessionError::NotReady(inner.state));
            }
            self.calls.submit(code)
        };
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Terminated),
        }
    }

    /// Tear the session down: every pending future on the text channel and
    /// every boot observer is rejected, then the machine returns to
    /// [`SessionState::Uninitialized`].
    pub fn terminate(&self) {
        let mut inner = self.inner.lock();
        inner.drain_boot_waiters(&SessionError::Terminated);
        self.calls.reject_all(&SessionError::Terminated);
        inner.transition(SessionState::Uninitialized);
    }
}

impl Inner {
    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug!(from = ?self.state, to = ?next, "session state change");
        self.state = next;
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    fn apply(&mut self, event: ScanEvent, calls: &CallRegistry) {
        match event {
            ScanEvent::CompileStarted => {
                self.diagnostics = CompileDiagnostics::default();
                self.transition(SessionState::Compiling);
            }
            ScanEvent::CompileDone => {
                self.seal_diagnostics();
                self.transition(SessionState::Compiled);
            }
            ScanEvent::Welcome { version } => {
                if self.state == SessionState::Compiling {
                    self.diagnostics.version = Some(version);
                    self.seal_diagnostics();
                } else if let Some(last) = self.last_compile.as_mut() {
                    last.version = Some(version);
                }
                self.transition(SessionState::Ready);
                self.resolve_boot_waiters();
            }
            ScanEvent::CompileFailed => {
                self.seal_diagnostics();
                self.transition(SessionState::CompileError);
                let diag = self.last_compile.clone().unwrap_or_default();
                let err = SessionError::Compile(Box::new(diag));
                self.drain_boot_waiters(&err);
                calls.reject_all(&err);
            }
            ScanEvent::Prompt => {
                self.transition(SessionState::Ready);
                self.resolve_boot_waiters();
            }
            ScanEvent::Marker(marker) => calls.handle_marker(marker),
            ScanEvent::Plain(text) => {
                let _ = self.events.send(SessionEvent::PlainOutput(text));
            }
            ScanEvent::Raw(text) => self.diagnostics.append_raw(&text),
        }
    }

    fn seal_diagnostics(&mut self) {
        let mut diag = mem::take(&mut self.diagnostics);
        diag.finalize();
        self.last_compile = Some(diag);
    }

    fn resolve_boot_waiters(&mut self) {
        self.boot_epoch += 1;
        for waiter in self.boot_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn drain_boot_waiters(&mut self, err: &SessionError) {
        self.boot_epoch += 1;
        for waiter in self.boot_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }
}
