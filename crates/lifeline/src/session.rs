//! [`Session`]: a live session handle, and the cascade task behind it.
//!
//! A session runs as a chain of generations. Each generation owns one
//! token cell, one authenticated client, and one refresh and one
//! connection supervisor:
//!
//! ```text
//!   generation 0 (a1) ──rotation(a2)──► teardown ──► generation 1 (a2) ──► ...
//!     cell, client,                     close socket    cell, client,
//!     refresh, link                     stop cell       refresh, link
//! ```
//!
//! A rotation tears the old generation down completely (its socket is
//! closed, its cell stopped) before the next one is built, so two live
//! sockets never overlap. Manual token changes inside a generation (an
//! authenticated call returning a token) don't start a new generation;
//! they publish a new snapshot with the same client and make the link
//! reconnect.
//!
//! All generations publish into the same [`ConnectionSlot`] and the same
//! snapshot cell, so a consumer's receivers survive rotations.
//!
//! A rotation arrives holding the old client's call turn, and the driver
//! keeps it until the next generation is published. Calls queued on the
//! old client then find its cell stopped, and [`Session`] replays them on
//! the new client instead of letting them spend a replaced token.

use std::sync::Arc;

use lifeline_backend::{Backend, Token, TokenData};
use lifeline_session::{
    AuthenticatedClient, CallError, ReplayCell, SessionError, SessionSnapshot,
    Subscription, TokenCell, TokenSubscription, VersionedToken,
};
use lifeline_supervisor::{
    ConnectionEvent, ConnectionSlot, ConnectionSupervisor, LinkState,
    RefreshState, RefreshSupervisor, Rotation, SupervisorHandle,
};
use lifeline_transport::Transport;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{LifelineConfig, LifelineError};

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// A live session: the current `(token, client)` pair and its room socket.
///
/// Dropping the handle stops the session in the background. Call
/// [`stop`](Self::stop) to stop it and wait until the socket is closed.
pub struct Session<B, T: Transport> {
    snapshots: ReplayCell<SessionSnapshot<B>>,
    slot: ConnectionSlot<T::Connection>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<B, T: Transport> std::fmt::Debug for Session<B, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("stopped", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<B: Backend, T: Transport> Session<B, T> {
    /// The latest snapshot. After stop, the last one published.
    pub fn current(&self) -> SessionSnapshot<B> {
        self.snapshots.get()
    }

    /// The session stream: the current snapshot first, then one per token
    /// change, in order. Ends when the session stops.
    pub fn subscribe(&self) -> Subscription<SessionSnapshot<B>> {
        self.snapshots.subscribe()
    }

    /// The token the next call will use. Read from the current
    /// generation's cell, so it can be ahead of [`current`](Self::current)
    /// until the driver publishes the matching snapshot.
    pub fn token(&self) -> Token {
        self.current().client.token()
    }

    /// The client of the current generation.
    pub fn client(&self) -> AuthenticatedClient<B> {
        self.current().client
    }

    /// How many rotations this session has gone through.
    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    /// The open socket, if there is one right now.
    pub fn connection(&self) -> Option<Arc<T::Connection>> {
        self.slot.current()
    }

    /// Notified whenever a socket is published or withdrawn.
    pub fn connections(&self) -> watch::Receiver<Option<Arc<T::Connection>>> {
        self.slot.watch()
    }

    /// Socket lifecycle events from now on, across all generations.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.slot.events()
    }

    /// Attaches credentials through the current client.
    ///
    /// Fails with [`SessionError::Stopped`] once the session is stopped.
    pub async fn register(
        &self,
        name: &str,
        password: &str,
    ) -> Result<TokenData, LifelineError> {
        self.call(move |client| async move { client.register(name, password).await })
            .await
    }

    /// Changes the password through the current client.
    ///
    /// A returned token is in the session before this resolves. Fails with
    /// [`SessionError::Stopped`] once the session is stopped.
    pub async fn change(
        &self,
        name: &str,
        password: &str,
        new_password: &str,
    ) -> Result<TokenData, LifelineError> {
        self.call(move |client| async move {
            client.change(name, password, new_password).await
        })
        .await
    }

    /// Runs `call` on the current client. A call whose client was retired
    /// by a rotation before it got its turn runs again on the new one.
    async fn call<F, Fut, R>(&self, call: F) -> Result<R, LifelineError>
    where
        F: Fn(AuthenticatedClient<B>) -> Fut,
        Fut: Future<Output = Result<R, CallError>>,
    {
        let mut client = self.client();
        loop {
            if self.is_stopped() {
                return Err(SessionError::Stopped.into());
            }
            match call(client.clone()).await {
                Err(e) if e.is_stopped() => {
                    let next = self.client();
                    if next.same_client(&client) {
                        return Err(e.into());
                    }
                    debug!(
                        generation = self.generation(),
                        "client retired by rotation, retrying on the new one"
                    );
                    client = next;
                }
                result => return result.map_err(LifelineError::from),
            }
        }
    }

    /// Stops the session and waits for teardown to finish.
    ///
    /// Safe to call any number of times, including concurrently; every
    /// call returns once the socket is closed.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut driver = self.driver.lock().await;
        if let Some(task) = driver.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "session driver panicked");
                }
            }
        }
    }

    /// `true` once [`stop`](Self::stop) was called or the handle dropped.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<B, T: Transport> Drop for Session<B, T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Cascade driver
// ---------------------------------------------------------------------------

/// Starts a session around `token`. Must run inside a tokio runtime.
pub(crate) fn start<B: Backend, T: Transport>(
    backend: Arc<B>,
    transport: Arc<T>,
    config: LifelineConfig,
    token: Token,
) -> Session<B, T> {
    let cancel = CancellationToken::new();
    let slot = ConnectionSlot::new();

    let cascade = Cascade {
        backend,
        transport,
        config,
        slot: slot.clone(),
        cancel: cancel.clone(),
    };
    let (first, snapshot) = cascade.build(0, token);
    let snapshots = ReplayCell::new(snapshot);
    info!(room_id = %cascade.config.room_id, "session started");

    let driver = tokio::spawn(cascade.run(first, snapshots.clone()));
    Session {
        snapshots,
        slot,
        cancel,
        driver: Mutex::new(Some(driver)),
    }
}

struct Cascade<B, T: Transport> {
    backend: Arc<B>,
    transport: Arc<T>,
    config: LifelineConfig,
    slot: ConnectionSlot<T::Connection>,
    cancel: CancellationToken,
}

/// Everything one generation owns.
struct Generation<B> {
    number: u64,
    client: AuthenticatedClient<B>,
    tokens: TokenSubscription,
    rotations: mpsc::UnboundedReceiver<Rotation>,
    refresh: SupervisorHandle<RefreshState>,
    link: SupervisorHandle<LinkState>,
    cancel: CancellationToken,
}

impl<B: Backend> Generation<B> {
    fn snapshot(&self, v: VersionedToken) -> SessionSnapshot<B> {
        SessionSnapshot {
            token: v.token,
            version: v.version,
            generation: self.number,
            client: self.client.clone(),
        }
    }

    /// Stops everything this generation owns. Returns once its socket is
    /// closed.
    async fn teardown(mut self) {
        self.cancel.cancel();
        self.client.token_cell().stop();
        self.link.stop().await;
        self.refresh.stop().await;
        debug!(generation = self.number, "generation torn down");
    }
}

impl<B: Backend, T: Transport> Cascade<B, T> {
    /// Builds generation `number` around `token`. Returns it with its
    /// first snapshot, which the caller publishes.
    fn build(&self, number: u64, token: Token) -> (Generation<B>, SessionSnapshot<B>) {
        let cell = TokenCell::new(token);
        let client = AuthenticatedClient::new(Arc::clone(&self.backend), cell.clone());
        let cancel = self.cancel.child_token();

        let mut tokens = cell.subscribe();
        // The seed value; it goes out as the generation's first snapshot.
        let seed = tokens.try_next().unwrap_or_else(|| cell.snapshot());

        let (refresh, rotations) =
            RefreshSupervisor::spawn(client.clone(), self.config.refresh, cancel.clone());
        let link = ConnectionSupervisor::spawn(
            Arc::clone(&self.transport),
            cell,
            self.config.target(),
            self.config.reconnect,
            self.slot.clone(),
            cancel.clone(),
        );

        let generation = Generation {
            number,
            client,
            tokens,
            rotations,
            refresh,
            link,
            cancel,
        };
        let first = generation.snapshot(seed);
        (generation, first)
    }

    async fn run(
        self,
        first: Generation<B>,
        snapshots: ReplayCell<SessionSnapshot<B>>,
    ) {
        let publish = |snapshot| {
            if snapshots.set(snapshot).is_err() {
                debug!("session stopped, snapshot dropped");
            }
        };
        let mut generation = first;

        loop {
            let next = loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break None,
                    changed = generation.tokens.next() => match changed {
                        Some(v) => {
                            debug!(generation = generation.number, version = v.version, "token changed");
                            publish(generation.snapshot(v));
                        }
                        None => {
                            warn!(generation = generation.number, "token cell stopped from outside, ending session");
                            break None;
                        }
                    },
                    rotation = generation.rotations.recv() => match rotation {
                        Some(r) if r.base_version == generation.client.token_cell().version() => {
                            break Some(r);
                        }
                        Some(r) => {
                            debug!(
                                generation = generation.number,
                                base_version = r.base_version,
                                "ignoring rotation of a superseded token"
                            );
                        }
                        None => break None,
                    },
                }
            };

            let number = generation.number;
            generation.teardown().await;

            let Some(Rotation { token, turn, .. }) = next else {
                break;
            };
            if self.cancel.is_cancelled() {
                break;
            }
            let (built, snapshot) = self.build(number + 1, token);
            generation = built;
            publish(snapshot);
            info!(generation = generation.number, "session rotated");
            // Queued calls on the old client may run now; they find its
            // cell stopped and move to the new client.
            drop(turn);
        }

        snapshots.stop();
        info!("session stopped");
    }
}
