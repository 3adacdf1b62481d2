//! Scripted backend and transport shared by the supervisor tests and the
//! orchestrator tests in `lifeline`.
//!
//! Both record what happened and when (tokio time, so tests can run with a
//! paused clock and assert exact spacing).

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lifeline_backend::{Backend, BackendError, PasswordChange, Token, TokenData};
use lifeline_transport::{
    ConnectParams, Connection, ConnectionId, SocketEvent, Transport,
    TransportError,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

// =========================================================================
// Backend
// =========================================================================

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: &'static str,
    pub token: Option<String>,
    pub at: Instant,
}

/// A backend whose `refresh` answers come from a queue.
///
/// Once the queue is empty, `refresh` never resolves, which keeps a test
/// from rotating further than it scripted.
#[derive(Default)]
pub struct MockBackend {
    refresh_script: Mutex<VecDeque<Result<Token, BackendError>>>,
    calls: Mutex<Vec<Call>>,
    refresh_delay: Mutex<Duration>,
    entry_error: Mutex<Option<BackendError>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refresh_ok(&self, token: &str) -> &Self {
        self.refresh_script
            .lock()
            .unwrap()
            .push_back(Ok(Token::new(token)));
        self
    }

    pub fn refresh_err(&self, err: BackendError) -> &Self {
        self.refresh_script.lock().unwrap().push_back(Err(err));
        self
    }

    /// Makes the next `init` or `login` fail with `err`.
    pub fn fail_entry(&self, err: BackendError) {
        *self.entry_error.lock().unwrap() = Some(err);
    }

    fn take_entry_error(&self) -> Result<(), BackendError> {
        let err = self.entry_error.lock().unwrap().take();
        err.map_or(Ok(()), Err)
    }

    /// Makes every `refresh` take `delay` before answering.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn refresh_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint == "refresh")
            .collect()
    }

    fn record(&self, endpoint: &'static str, token: Option<&Token>) {
        self.calls.lock().unwrap().push(Call {
            endpoint,
            token: token.map(|t| t.as_str().to_string()),
            at: Instant::now(),
        });
    }
}

impl Backend for MockBackend {
    async fn init(&self) -> Result<Token, BackendError> {
        self.record("init", None);
        self.take_entry_error()?;
        Ok(Token::new("a1"))
    }

    async fn login(&self, name: &str, _: &str) -> Result<Token, BackendError> {
        self.record("login", None);
        self.take_entry_error()?;
        Ok(Token::new(format!("login-{name}")))
    }

    async fn refresh(&self, token: &Token) -> Result<Token, BackendError> {
        self.record("refresh", Some(token));
        let delay = *self.refresh_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        let next = self.refresh_script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn register(
        &self,
        token: &Token,
        _: &str,
        _: &str,
    ) -> Result<TokenData, BackendError> {
        self.record("register", Some(token));
        Ok(TokenData::default())
    }

    async fn change(
        &self,
        token: &Token,
        _: &PasswordChange,
    ) -> Result<TokenData, BackendError> {
        self.record("change", Some(token));
        Ok(TokenData::with_token("changed"))
    }
}

// =========================================================================
// Transport
// =========================================================================

/// What the next `connect` call does.
#[derive(Debug, Clone)]
pub enum Plan {
    /// Returns a handle that reports `Connected` and stays up.
    Open,
    /// `connect` itself fails.
    Refuse,
    /// Returns a handle whose first event is this failure.
    FailWith(SocketEvent),
    /// `connect` takes this long, then behaves like `Open`.
    Slow(Duration),
}

/// Everything the transport saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Attempt { token: String, room_id: String },
    Open { id: u64, token: String },
    Close { id: u64 },
}

#[derive(Default)]
struct Shared {
    log: Mutex<Vec<(Op, Instant)>>,
    feeds: Mutex<HashMap<u64, mpsc::UnboundedSender<SocketEvent>>>,
}

impl Shared {
    fn push(&self, op: Op) {
        self.log.lock().unwrap().push((op, Instant::now()));
    }
}

#[derive(Default)]
pub struct MockTransport {
    plans: Mutex<VecDeque<Plan>>,
    next_id: AtomicU64,
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues plans for the next calls. Unscripted calls use `Plan::Open`.
    pub fn plan(&self, plans: impl IntoIterator<Item = Plan>) {
        self.plans.lock().unwrap().extend(plans);
    }

    pub fn log(&self) -> Vec<Op> {
        self.shared.log.lock().unwrap().iter().map(|(op, _)| op.clone()).collect()
    }

    pub fn timed_log(&self) -> Vec<(Op, Instant)> {
        self.shared.log.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.timed_log()
            .into_iter()
            .filter(|(op, _)| matches!(op, Op::Attempt { .. }))
            .map(|(_, at)| at)
            .collect()
    }

    pub fn opened_tokens(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|op| match op {
                Op::Open { token, .. } => Some(token),
                _ => None,
            })
            .collect()
    }

    /// Pushes an event into the feed of live connection `id`.
    pub fn inject(&self, id: ConnectionId, event: SocketEvent) {
        let feeds = self.shared.feeds.lock().unwrap();
        let feed = feeds.get(&id.into_inner()).expect("no such connection");
        feed.send(event).expect("connection feed closed");
    }

    /// Highest number of handles open at the same time.
    pub fn max_concurrent_open(&self) -> usize {
        let mut open = 0usize;
        let mut max = 0usize;
        for op in self.log() {
            match op {
                Op::Open { .. } => open += 1,
                Op::Close { .. } => open -= 1,
                Op::Attempt { .. } => {}
            }
            max = max.max(open);
        }
        max
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;
    type Error = TransportError;

    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<MockConnection, TransportError> {
        self.shared.push(Op::Attempt {
            token: params.token.clone(),
            room_id: params.room_id.clone(),
        });
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Open);

        let first_event = match plan {
            Plan::Refuse => {
                return Err(TransportError::ConnectionClosed("refused".into()));
            }
            Plan::Slow(delay) => {
                tokio::time::sleep(delay).await;
                SocketEvent::Connected
            }
            Plan::Open => SocketEvent::Connected,
            Plan::FailWith(event) => event,
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(first_event);
        self.shared.feeds.lock().unwrap().insert(id, tx);
        self.shared.push(Op::Open {
            id,
            token: params.token.clone(),
        });

        Ok(MockConnection {
            id: ConnectionId::new(id),
            events: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct MockConnection {
    id: ConnectionId,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<SocketEvent>>,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

impl Connection for MockConnection {
    type Error = TransportError;

    async fn next_event(&self) -> Option<SocketEvent> {
        self.events.lock().await.recv().await
    }

    async fn send(&self, _: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed("already closed".into()));
        }
        self.shared.feeds.lock().unwrap().remove(&self.id.into_inner());
        self.shared.push(Op::Close {
            id: self.id.into_inner(),
        });
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
