use std::time::Duration;

use pretty_assertions::assert_eq;
use scbridge::{SclangSession, SessionConfig, SessionError, SessionEvent, SessionState};
use tokio::sync::mpsc;

fn new_session(
    config: SessionConfig,
) -> (
    SclangSession,
    mpsc::UnboundedReceiver<SessionEvent>,
    mpsc::UnboundedReceiver<String>,
) {
    let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
    let (session, events) = SclangSession::new(config, stdin_tx);
    (session, events, stdin_rx)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn boot_drives_through_compile_to_ready() {
    let (session, _events, _stdin) = new_session(SessionConfig::default());
    assert_eq!(session.state(), SessionState::Uninitialized);

    let booting = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });
    settle().await;
    assert_eq!(session.state(), SessionState::Booting);

    session.ingest("compiling class library\n");
    assert_eq!(session.state(), SessionState::Compiling);

    session.ingest("compile done\n");
    assert_eq!(session.state(), SessionState::Compiled);

    session.ingest("*** Welcome to SuperCollider 3.13.0. ***\n");
    assert_eq!(session.state(), SessionState::Ready);

    booting.await.unwrap().unwrap();
    let diag = session.last_compile().unwrap();
    assert_eq!(diag.version.as_deref(), Some("3.13.0"));
}

#[tokio::test]
async fn compile_failure_rejects_boot_with_diagnostics() {
    let (session, _events, _stdin) = new_session(SessionConfig::default());
    let booting = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });
    settle().await;

    session.ingest("compiling class library\n");
    session.ingest("\tcompiling dir: '/usr/share/SCClassLibrary'\n");
    session.ingest("ERROR: Parse error\n  in file '/home/me/Broken.sc'\n  line 7 char 2\n");
    session.ingest("ERROR: duplicate Class found: 'Foo'\n/a/Foo.sc\n/b/Foo.sc\n");
    session.ingest("Library has not been compiled successfully\n");

    assert_eq!(session.state(), SessionState::CompileError);
    let err = booting.await.unwrap().unwrap_err();
    let diag = match err {
        SessionError::Compile(diag) => diag,
        other => panic!("expected compile error, got {other:?}"),
    };
    assert_eq!(diag.compiled_dirs, vec!["/usr/share/SCClassLibrary"]);
    assert_eq!(diag.errors.len(), 1);
    assert_eq!(diag.errors[0].message, "Parse error");
    assert_eq!(diag.errors[0].line, 7);
    assert_eq!(diag.duplicate_classes.len(), 1);
    assert_eq!(diag.duplicate_classes[0].for_class, "Foo");
    assert_eq!(
        diag.duplicate_classes[0].files,
        vec!["/a/Foo.sc", "/b/Foo.sc"]
    );
}

#[tokio::test]
async fn silent_boot_times_out_into_compile_error() {
    let config = SessionConfig {
        boot_timeout: Duration::from_millis(50),
    };
    let (session, _events, _stdin) = new_session(config);

    let err = session.boot().await.unwrap_err();
    assert!(matches!(err, SessionError::BootTimeout(_)));
    assert_eq!(session.state(), SessionState::CompileError);
}

#[tokio::test]
async fn state_changes_and_plain_output_reach_the_event_stream() {
    let (session, mut events, _stdin) = new_session(SessionConfig::default());
    let _booting = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });
    settle().await;

    session.ingest("compiling class library\ncompile done\n");
    session.ingest("*** Welcome to SuperCollider 3.13.0. ***\n");
    session.ingest("post window chatter\n");

    let mut states = Vec::new();
    let mut plain = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StateChanged(state) => states.push(state),
            SessionEvent::PlainOutput(text) => plain.push(text),
            SessionEvent::OutOfBand { .. } => {}
        }
    }

    assert_eq!(
        states,
        vec![
            SessionState::Booting,
            SessionState::Compiling,
            SessionState::Compiled,
            SessionState::Ready,
        ]
    );
    assert!(plain.iter().any(|t| t.contains("post window chatter")));
}

#[tokio::test]
async fn settled_boot_timer_leaves_a_later_recompile_alone() {
    let config = SessionConfig {
        boot_timeout: Duration::from_millis(80),
    };
    let (session, _events, _stdin) = new_session(config);
    let booting = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });
    settle().await;
    session.ingest("compiling class library\ncompile done\n");
    session.ingest("*** Welcome to SuperCollider 3.13.0. ***\n");
    booting.await.unwrap().unwrap();

    // recompile is underway when the original timeout would fire
    session.ingest("compiling class library\n");
    assert_eq!(session.state(), SessionState::Compiling);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.state(), SessionState::Compiling);
}

#[tokio::test]
async fn recompile_from_ready_starts_a_fresh_pass() {
    let (session, _events, _stdin) = new_session(SessionConfig::default());
    let _booting = tokio::spawn({
        let session = session.clone();
        async move { session.boot().await }
    });
    settle().await;

    session.ingest("compiling class library\ncompile done\n");
    session.ingest("*** Welcome to SuperCollider 3.13.0. ***\n");
    assert_eq!(session.state(), SessionState::Ready);

    session.ingest("compiling class library\n");
    assert_eq!(session.state(), SessionState::Compiling);
    session.ingest("compile done\n*** Welcome to SuperCollider 3.13.0. ***\n");
    assert_eq!(session.state(), SessionState::Ready);
}
