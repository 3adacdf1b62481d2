//! Integration tests for session orchestration: entry calls, rotation
//! cascades, reconnects and teardown.
//!
//! Everything runs on a paused clock against the scripted backend and
//! transport the supervisor tests use.

#[path = "../../lifeline-supervisor/tests/common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockBackend, MockConnection, MockTransport, Op, Plan};
use lifeline::prelude::*;
use tokio::time::{Instant, timeout};

// =========================================================================
// Helpers
// =========================================================================

const INTERVAL: Duration = Duration::from_secs(60);
const REFRESH_RETRY: Duration = Duration::from_secs(5);
const RECONNECT: Duration = Duration::from_secs(3);

type TestSession = Session<MockBackend, MockTransport>;

fn orchestrator(
    backend: &Arc<MockBackend>,
    transport: &Arc<MockTransport>,
) -> SessionOrchestrator<MockBackend, MockTransport> {
    let config = LifelineConfig::builder()
        .socket_url("ws://rooms.test/socket")
        .room_id("lobby")
        .refresh_interval(INTERVAL)
        .refresh_retry_delay(REFRESH_RETRY)
        .reconnect_delay(RECONNECT)
        .build()
        .unwrap();
    SessionOrchestrator::from_shared(Arc::clone(backend), Arc::clone(transport), config)
        .unwrap()
}

/// Waits for a published connection other than `not`.
async fn wait_open(session: &TestSession, not: Option<ConnectionId>) -> Arc<MockConnection> {
    let mut rx = session.connections();
    let found = timeout(
        Duration::from_secs(600),
        rx.wait_for(|c| c.as_ref().is_some_and(|c| Some(c.id()) != not)),
    )
    .await
    .expect("a connection should open")
    .expect("slot alive");
    found.clone().expect("checked is_some")
}

async fn wait_closed(session: &TestSession) {
    let mut rx = session.connections();
    timeout(Duration::from_secs(600), rx.wait_for(Option::is_none))
        .await
        .expect("the connection should close")
        .expect("slot alive");
}

fn close_index(log: &[Op], id: ConnectionId) -> usize {
    log.iter()
        .position(|op| *op == Op::Close { id: id.into_inner() })
        .expect("connection was closed")
}

fn open_index(log: &[Op], id: ConnectionId) -> usize {
    log.iter()
        .position(|op| matches!(op, Op::Open { id: i, .. } if *i == id.into_inner()))
        .expect("connection was opened")
}

// =========================================================================
// Entry points
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_create_with_login_uses_login_token() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();

    let session = orchestrator(&backend, &transport)
        .create_with_login("ann", "pw")
        .await
        .unwrap();
    wait_open(&session, None).await;

    assert_eq!(session.token(), Token::new("login-ann"));
    assert_eq!(session.generation(), 0);
    assert_eq!(transport.opened_tokens(), vec!["login-ann"]);
    assert_eq!(
        transport.log()[0],
        Op::Attempt {
            token: "login-ann".into(),
            room_id: "lobby".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_create_with_token_refreshes_it_first() {
    let backend = MockBackend::new();
    backend.refresh_ok("fresh");
    let transport = MockTransport::new();

    let session = orchestrator(&backend, &transport)
        .create_with_token("saved")
        .await
        .unwrap();
    wait_open(&session, None).await;

    assert_eq!(backend.refresh_calls()[0].token.as_deref(), Some("saved"));
    assert_eq!(session.token(), Token::new("fresh"));
    assert_eq!(transport.opened_tokens(), vec!["fresh"]);
}

#[tokio::test(start_paused = true)]
async fn test_create_fails_when_entry_call_fails() {
    let backend = MockBackend::new();
    backend.fail_entry(BackendError::Rejected {
        envelope: serde_json::json!({"result": {"success": false}}),
    });
    backend.refresh_err(BackendError::Unavailable("expired".into()));
    let transport = MockTransport::new();
    let orchestrator = orchestrator(&backend, &transport);

    let err = orchestrator.create_anonymous().await.unwrap_err();
    assert!(matches!(err, LifelineError::Backend(BackendError::Rejected { .. })));

    let err = orchestrator.create_with_token("stale").await.unwrap_err();
    assert!(matches!(err, LifelineError::Backend(BackendError::Unavailable(_))));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(transport.log().is_empty(), "no socket without a session");
}

#[test]
fn test_orchestrator_rejects_invalid_config() {
    let config = LifelineConfig::new("ftp://nowhere", "lobby");
    let result = SessionOrchestrator::new(MockBackend::default(), MockTransport::default(), config);
    assert!(matches!(result, Err(LifelineError::Transport(_))));
}

// =========================================================================
// Rotation cascade
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_rotation_replaces_session_and_closes_old_socket_first() {
    let backend = MockBackend::new();
    backend.refresh_ok("a2");
    let transport = MockTransport::new();
    let start = Instant::now();

    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let mut snapshots = session.subscribe();
    let first_conn = wait_open(&session, None).await;

    let first = snapshots.next().await.unwrap();
    assert_eq!((first.token.as_str(), first.generation, first.version), ("a1", 0, 0));

    let second = snapshots.next().await.unwrap();
    assert_eq!((second.token.as_str(), second.generation, second.version), ("a2", 1, 0));
    assert!(!first.client.same_client(&second.client));
    assert_eq!(backend.refresh_calls()[0].at - start, INTERVAL);

    let second_conn = wait_open(&session, Some(first_conn.id())).await;
    let log = transport.log();
    assert!(
        close_index(&log, first_conn.id()) < open_index(&log, second_conn.id()),
        "old socket must close before the new one opens: {log:?}"
    );
    assert_eq!(transport.opened_tokens(), vec!["a1", "a2"]);
    assert_eq!(transport.max_concurrent_open(), 1);

    // The old generation's cell is terminal.
    assert!(first.client.token_cell().is_stopped());
    assert!(!second.client.token_cell().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_successive_rotations_emit_one_snapshot_each() {
    let backend = MockBackend::new();
    backend.refresh_ok("a2").refresh_ok("a3");
    let transport = MockTransport::new();

    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let mut snapshots = session.subscribe();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let s = snapshots.next().await.unwrap();
        seen.push((s.token.into_inner(), s.generation));
    }
    assert_eq!(
        seen,
        vec![
            (String::from("a1"), 0),
            (String::from("a2"), 1),
            (String::from("a3"), 2),
        ]
    );

    // Each refresh used the token of its own generation.
    let tokens: Vec<_> = backend
        .refresh_calls()
        .into_iter()
        .map(|c| c.token.unwrap())
        .collect();
    assert_eq!(&tokens[..2], ["a1", "a2"]);

    tokio::time::sleep(INTERVAL * 3).await;
    assert!(snapshots.try_next().is_none(), "no duplicate snapshots");
    assert_eq!(transport.max_concurrent_open(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_failures_then_success_rotate_once() {
    let backend = MockBackend::new();
    for _ in 0..3 {
        backend.refresh_err(BackendError::Unavailable("down".into()));
    }
    backend.refresh_ok("a2");
    let transport = MockTransport::new();
    let start = Instant::now();

    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let mut snapshots = session.subscribe();
    assert_eq!(snapshots.next().await.unwrap().token, Token::new("a1"));

    let rotated = snapshots.next().await.unwrap();
    assert_eq!(rotated.token, Token::new("a2"));
    assert_eq!(rotated.generation, 1);

    let at: Vec<Duration> = backend
        .refresh_calls()
        .iter()
        .map(|c| c.at - start)
        .collect();
    assert_eq!(
        at,
        vec![
            INTERVAL,
            INTERVAL + REFRESH_RETRY,
            INTERVAL + REFRESH_RETRY * 2,
            INTERVAL + REFRESH_RETRY * 3,
        ]
    );
    // The session stayed on a1 the whole time.
    assert_eq!(transport.opened_tokens()[0], "a1");
}

// =========================================================================
// Manual token changes
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_manual_change_keeps_client_and_reconnects_immediately() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let mut snapshots = session.subscribe();
    let first = snapshots.next().await.unwrap();
    let first_conn = wait_open(&session, None).await;
    let changed_at = Instant::now();

    let data = session.change("ann", "old", "new").await.unwrap();
    assert_eq!(data.token, Some(Token::new("changed")));

    let update = snapshots.next().await.unwrap();
    assert_eq!((update.token.as_str(), update.generation, update.version), ("changed", 0, 1));
    assert!(first.client.same_client(&update.client));

    let second_conn = wait_open(&session, Some(first_conn.id())).await;
    assert_eq!(Instant::now(), changed_at);
    let log = transport.log();
    assert!(close_index(&log, first_conn.id()) < open_index(&log, second_conn.id()));
    assert_eq!(transport.opened_tokens(), vec!["a1", "changed"]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_reconnects_with_then_current_token() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let first_conn = wait_open(&session, None).await;

    transport.inject(first_conn.id(), SocketEvent::Disconnect("transport close".into()));
    wait_closed(&session).await;
    let lost_at = Instant::now();

    // The token changes during the reconnect gap.
    session.change("ann", "old", "new").await.unwrap();
    let second_conn = wait_open(&session, Some(first_conn.id())).await;

    assert_eq!(Instant::now() - lost_at, RECONNECT);
    assert_eq!(transport.opened_tokens(), vec!["a1", "changed"]);
    assert_eq!(second_conn.id().into_inner(), 2);
    assert_eq!(session.generation(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failures_then_success_expose_one_connection() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();
    transport.plan([Plan::Refuse, Plan::Refuse, Plan::Open]);
    let start = Instant::now();

    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    wait_open(&session, None).await;

    let spacing: Vec<Duration> = transport.attempts().iter().map(|at| *at - start).collect();
    assert_eq!(spacing, vec![Duration::ZERO, RECONNECT, RECONNECT * 2]);
    assert_eq!(transport.opened_tokens(), vec!["a1"]);
}

#[tokio::test(start_paused = true)]
async fn test_change_during_scheduled_refresh_lands_on_rotated_session() {
    let backend = MockBackend::new();
    backend.set_refresh_delay(Duration::from_secs(2));
    backend.refresh_ok("a2");
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    wait_open(&session, None).await;

    // The scheduled refresh is in flight from INTERVAL to INTERVAL + 2s.
    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    let data = session.change("ann", "old", "new").await.unwrap();
    assert_eq!(data.token, Some(Token::new("changed")));

    // The change waited for the rotation and used the rotated token.
    let calls: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| c.endpoint != "init")
        .map(|c| (c.endpoint, c.token.unwrap()))
        .collect();
    assert_eq!(
        calls,
        vec![("refresh", "a1".to_string()), ("change", "a2".to_string())]
    );

    // Its token is the session's token by the time it resolves.
    assert_eq!(session.token(), Token::new("changed"));
    assert_eq!(session.generation(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let current = session.current();
    assert_eq!(
        (current.token.as_str(), current.generation, current.version),
        ("changed", 1, 1)
    );
    let opened = transport.opened_tokens();
    assert_eq!(opened.first().map(String::as_str), Some("a1"));
    assert_eq!(opened.last().map(String::as_str), Some("changed"));
    assert_eq!(transport.max_concurrent_open(), 1);
}

// =========================================================================
// Stopping
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_while_refresh_pending_keeps_cell_untouched() {
    let backend = MockBackend::new();
    backend.set_refresh_delay(Duration::from_secs(30));
    backend.refresh_ok("a2");
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let mut snapshots = session.subscribe();
    let client = session.client();
    wait_open(&session, None).await;

    tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(backend.refresh_calls().len(), 1);
    session.stop().await;
    tokio::time::sleep(INTERVAL * 3).await;

    assert!(session.is_stopped());
    assert_eq!(session.token(), Token::new("a1"));
    assert_eq!(session.generation(), 0);
    assert!(client.token_cell().is_stopped());
    assert_eq!(client.token_cell().version(), 0);
    assert_eq!(transport.opened_tokens(), vec!["a1"]);
    assert!(matches!(transport.log().last(), Some(Op::Close { .. })));
    assert!(session.connection().is_none());

    assert_eq!(snapshots.next().await.map(|s| s.generation), Some(0));
    assert!(snapshots.next().await.is_none(), "stream ends on stop");
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_connect_pending_opens_nothing() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();
    transport.plan([Plan::Slow(Duration::from_secs(30))]);
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    session.stop().await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.attempts().len(), 1);
    assert!(transport.opened_tokens().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_twice_is_idempotent() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    wait_open(&session, None).await;

    tokio::join!(session.stop(), session.stop());
    session.stop().await;

    let closes = transport
        .log()
        .into_iter()
        .filter(|op| matches!(op, Op::Close { .. }))
        .count();
    assert_eq!(closes, 1);
    assert!(session.is_stopped());
}

#[tokio::test(start_paused = true)]
async fn test_calls_after_stop_fail_without_reaching_backend() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let client = session.client();
    wait_open(&session, None).await;

    session.stop().await;

    let err = session.change("ann", "old", "new").await.unwrap_err();
    assert!(matches!(err, LifelineError::Session(SessionError::Stopped)));
    let err = session.register("ann", "pw").await.unwrap_err();
    assert!(matches!(err, LifelineError::Session(SessionError::Stopped)));
    // A client handle kept from before the stop is retired too.
    assert!(client.change("ann", "old", "new").await.unwrap_err().is_stopped());

    assert!(backend.calls().iter().all(|c| c.endpoint == "init"));
    assert_eq!(session.token(), Token::new("a1"));
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_session_in_background() {
    let backend = MockBackend::new();
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let mut snapshots = session.subscribe();
    wait_open(&session, None).await;

    drop(session);

    let _ = snapshots.next().await;
    let ended = timeout(Duration::from_secs(1), snapshots.next()).await;
    assert!(matches!(ended, Ok(None)));
    assert!(matches!(transport.log().last(), Some(Op::Close { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_events_continue_across_generations() {
    let backend = MockBackend::new();
    backend.refresh_ok("a2");
    let transport = MockTransport::new();
    let session = orchestrator(&backend, &transport)
        .create_anonymous()
        .await
        .unwrap();
    let mut events = session.events();
    let first_conn = wait_open(&session, None).await;
    let second_conn = wait_open(&session, Some(first_conn.id())).await;

    let mut seen = Vec::new();
    while let Ok(e) = events.try_recv() {
        seen.push(e);
    }
    let closed = seen
        .iter()
        .position(|e| *e == ConnectionEvent::Closed(first_conn.id()))
        .unwrap();
    let opened = seen
        .iter()
        .position(|e| *e == ConnectionEvent::Opened(second_conn.id()))
        .unwrap();
    assert!(closed < opened);
}
