//! [`ConnectionSupervisor`]: keeps exactly one room socket open.
//!
//! ```text
//!   CONNECTING ──handle──► OPEN ──failure event──► BACKOFF(retry_delay) ──► CONNECTING
//!       │                   │
//!     error                 └──token changed──► close, CONNECTING (no delay)
//!       ▼
//!    BACKOFF
//! ```
//!
//! Every attempt reads the token from the cell at the moment it starts, so
//! a reconnect after a gap always uses whatever token is current then.
//!
//! The live handle is published through a [`ConnectionSlot`]. The
//! supervisor owns the connection: on every way out of OPEN it closes the
//! handle and clears the slot before doing anything else, so consumers
//! never see two handles and never see a handle the supervisor has given
//! up on.

use std::sync::Arc;

use lifeline_session::TokenCell;
use lifeline_transport::{
    ConnectParams, Connection, ConnectionId, SocketEvent, Transport,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::saturating_millis;
use crate::{ReconnectPolicy, SupervisorHandle};

/// Capacity of the connection event broadcast. Slow receivers that fall
/// further behind than this see `RecvError::Lagged`.
pub const EVENT_CAPACITY: usize = 256;

/// What the connection supervisor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// A connect call is in flight.
    Connecting,
    /// A handle is published.
    Open(ConnectionId),
    /// Waiting before the next attempt.
    Backoff,
    /// The task has exited.
    Stopped,
}

/// Lifecycle events of the supervised connection, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Attempt number `attempt` is starting (1-based, reset once a
    /// handshake succeeds).
    Connecting { attempt: u32 },
    /// A handle was published.
    Opened(ConnectionId),
    /// A data frame arrived on the open connection.
    Data(ConnectionId, Vec<u8>),
    /// The open connection reported a failure.
    Lost { id: ConnectionId, reason: String },
    /// The connect call itself failed.
    ConnectFailed { attempt: u32, reason: String },
    /// The handle was closed and withdrawn.
    Closed(ConnectionId),
}

/// Where to connect. The token comes from the cell on each attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub url: String,
    pub room_id: String,
}

impl ConnectionTarget {
    pub fn new(url: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            room_id: room_id.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionSlot
// ---------------------------------------------------------------------------

/// The single place a live connection is published.
///
/// Cloning shares the slot. One slot can outlive many supervisors: the
/// orchestrator hands the same slot to the supervisor of each session
/// generation, so consumers keep one receiver across rotations.
pub struct ConnectionSlot<C> {
    current: watch::Sender<Option<Arc<C>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl<C> Clone for ConnectionSlot<C> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            events: self.events.clone(),
        }
    }
}

impl<C> Default for ConnectionSlot<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ConnectionSlot<C> {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { current, events }
    }

    /// The published handle, if any.
    pub fn current(&self) -> Option<Arc<C>> {
        self.current.borrow().clone()
    }

    /// A receiver that sees every publish and withdrawal.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<C>>> {
        self.current.subscribe()
    }

    /// A receiver for lifecycle events emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, conn: Arc<C>) {
        self.current.send_replace(Some(conn));
    }

    fn withdraw(&self) {
        self.current.send_replace(None);
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Spawns connection loops. See the module docs for the state machine.
pub struct ConnectionSupervisor;

impl ConnectionSupervisor {
    /// Starts keeping a connection to `target` open.
    ///
    /// The task ends when `cancel` fires or the cell is stopped; either way
    /// the open handle, if any, is closed first.
    pub fn spawn<T: Transport>(
        transport: Arc<T>,
        cell: TokenCell,
        target: ConnectionTarget,
        policy: ReconnectPolicy,
        slot: ConnectionSlot<T::Connection>,
        cancel: CancellationToken,
    ) -> SupervisorHandle<LinkState> {
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let link = Link {
            transport,
            cell,
            target,
            policy: policy.validated(),
            slot,
            cancel: cancel.clone(),
            state: state_tx,
        };
        let task = tokio::spawn(link.run());
        SupervisorHandle::new(cancel, task, state_rx)
    }
}

/// How the OPEN state was left.
enum Exit {
    Stop,
    TokenChanged,
    Lost(String),
}

struct Link<T: Transport> {
    transport: Arc<T>,
    cell: TokenCell,
    target: ConnectionTarget,
    policy: ReconnectPolicy,
    slot: ConnectionSlot<T::Connection>,
    cancel: CancellationToken,
    state: watch::Sender<LinkState>,
}

impl<T: Transport> Link<T> {
    async fn run(self) {
        let mut changes = self.cell.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() || self.cell.is_stopped() {
                break;
            }
            // Anything queued is already reflected in the snapshot below.
            while changes.try_next().is_some() {}
            let snapshot = self.cell.snapshot();

            attempt += 1;
            self.state.send_replace(LinkState::Connecting);
            self.slot.emit(ConnectionEvent::Connecting { attempt });
            let params = ConnectParams::new(
                &self.target.url,
                &self.target.room_id,
                snapshot.token.as_str(),
            );
            debug!(attempt, version = snapshot.version, "connecting");

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect(&params) => result,
            };
            let conn = match connected {
                Ok(conn) => Arc::new(conn),
                Err(e) => {
                    warn!(attempt, error = %e, "connect failed");
                    self.slot.emit(ConnectionEvent::ConnectFailed {
                        attempt,
                        reason: e.to_string(),
                    });
                    if self.backoff().await {
                        continue;
                    }
                    break;
                }
            };

            let id = conn.id();
            self.slot.publish(Arc::clone(&conn));
            self.state.send_replace(LinkState::Open(id));
            self.slot.emit(ConnectionEvent::Opened(id));
            info!(conn_id = %id, attempt, version = snapshot.version, "connection opened");

            let exit = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break Exit::Stop,
                    changed = changes.next() => match changed {
                        Some(v) if v.version > snapshot.version => break Exit::TokenChanged,
                        Some(_) => {}
                        None => break Exit::Stop,
                    },
                    event = conn.next_event() => match event {
                        Some(SocketEvent::Connected) => {
                            debug!(conn_id = %id, "handshake complete");
                            attempt = 0;
                        }
                        Some(SocketEvent::Data(bytes)) => {
                            self.slot.emit(ConnectionEvent::Data(id, bytes));
                        }
                        Some(failure) => break Exit::Lost(failure.to_string()),
                        None => break Exit::Lost("event feed ended".into()),
                    },
                }
            };

            if let Exit::Lost(reason) = &exit {
                warn!(conn_id = %id, reason = %reason, "connection lost");
                self.slot.emit(ConnectionEvent::Lost {
                    id,
                    reason: reason.clone(),
                });
            }
            self.release(&conn).await;

            match exit {
                Exit::Stop => break,
                Exit::TokenChanged => {
                    info!(conn_id = %id, "token changed, reconnecting");
                    attempt = 0;
                }
                Exit::Lost(_) => {
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(LinkState::Stopped);
        debug!("connection supervisor stopped");
    }

    /// Closes `conn` and withdraws it. Close errors are only logged.
    async fn release(&self, conn: &T::Connection) {
        let id = conn.id();
        if let Err(e) = conn.close().await {
            debug!(conn_id = %id, error = %e, "close failed, ignoring");
        }
        self.slot.withdraw();
        self.slot.emit(ConnectionEvent::Closed(id));
        debug!(conn_id = %id, "connection released");
    }

    /// Sleeps for the next retry delay. `false` if cancelled meanwhile.
    async fn backoff(&self) -> bool {
        self.state.send_replace(LinkState::Backoff);
        let delay = self.policy.next_delay();
        debug!(delay_ms = saturating_millis(delay), "waiting before reconnect");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}
