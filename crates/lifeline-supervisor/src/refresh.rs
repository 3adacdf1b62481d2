//! [`RefreshSupervisor`]: calls `refresh` on a schedule and reports the
//! token it gets back.
//!
//! ```text
//! WAITING(interval) ──timer──► REFRESHING ──ok────► emit Rotation, WAITING(interval)
//!        ▲                          └──────error──► WAITING(retry_delay)
//!        └── token changed (any WAITING state)
//! ```
//!
//! The supervisor never writes the token cell. A successful refresh is
//! sent on the rotation channel and the owner decides what to do with it;
//! the orchestrator rebuilds the whole session around the new token.
//!
//! Each [`Rotation`] carries the client's call [`Turn`]. Calls queued on
//! the client behind the refresh stay queued until the owner drops it, so
//! none of them can start from the token the refresh just replaced.
//!
//! Failures are logged and retried forever. Nothing here ever reports an
//! error to the owner.

use lifeline_backend::{Backend, Token};
use lifeline_session::{AuthenticatedClient, CallError, Turn};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::policy::saturating_millis;
use crate::{RefreshPolicy, SupervisorHandle};

/// What the refresh supervisor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Sleeping until the next attempt.
    Waiting,
    /// A `refresh` call is in flight.
    Refreshing,
    /// The task has exited.
    Stopped,
}

/// A refreshed token, emitted once per successful scheduled refresh.
#[derive(Debug)]
pub struct Rotation {
    pub token: Token,
    /// The cell version the refresh was made from. Always the cell's
    /// current version at the moment of emission.
    pub base_version: u64,
    /// The client's call turn. Drop it once the rotation is applied.
    pub turn: Turn,
}

/// Spawns refresh loops. See the module docs for the state machine.
pub struct RefreshSupervisor;

impl RefreshSupervisor {
    /// Starts refreshing the token held by `client`'s cell.
    ///
    /// The task ends when `cancel` fires, when the cell is stopped, or when
    /// the rotation receiver is dropped.
    pub fn spawn<B: Backend>(
        client: AuthenticatedClient<B>,
        policy: RefreshPolicy,
        cancel: CancellationToken,
    ) -> (SupervisorHandle<RefreshState>, mpsc::UnboundedReceiver<Rotation>) {
        let policy = policy.validated();
        let (rotation_tx, rotation_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RefreshState::Waiting);

        let task = tokio::spawn(run(
            client,
            policy,
            cancel.clone(),
            rotation_tx,
            state_tx,
        ));
        debug!(
            interval_ms = saturating_millis(policy.interval),
            retry_ms = saturating_millis(policy.retry_delay),
            "refresh supervisor started"
        );

        (SupervisorHandle::new(cancel, task, state_rx), rotation_rx)
    }
}

async fn run<B: Backend>(
    client: AuthenticatedClient<B>,
    policy: RefreshPolicy,
    cancel: CancellationToken,
    rotations: mpsc::UnboundedSender<Rotation>,
    state: watch::Sender<RefreshState>,
) {
    let cell = client.token_cell().clone();
    let mut changes = cell.subscribe();
    // The first item is the value the schedule starts from.
    let _ = changes.try_next();

    let mut delay = policy.interval;
    let mut attempt: u32 = 0;

    'supervise: loop {
        state.send_replace(RefreshState::Waiting);
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'supervise,
                changed = changes.next() => match changed {
                    Some(v) => {
                        debug!(version = v.version, "token changed, restarting refresh interval");
                        sleep.as_mut().reset(Instant::now() + policy.interval);
                        attempt = 0;
                    }
                    None => {
                        debug!("token cell stopped");
                        break 'supervise;
                    }
                },
                () = &mut sleep => break,
            }
        }

        state.send_replace(RefreshState::Refreshing);
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'supervise,
            result = client.refresh_detached() => result,
        };

        delay = match result {
            Ok((refreshed, turn)) => {
                let current = cell.version();
                if refreshed.base_version != current {
                    debug!(
                        base_version = refreshed.base_version,
                        current,
                        "discarding refresh of a superseded token"
                    );
                } else {
                    info!(attempt, version = current, "token refreshed");
                    let rotation = Rotation {
                        token: refreshed.token,
                        base_version: refreshed.base_version,
                        turn,
                    };
                    if rotations.send(rotation).is_err() {
                        debug!("rotation receiver dropped");
                        break 'supervise;
                    }
                }
                attempt = 0;
                policy.interval
            }
            Err(CallError::Session(_)) => {
                debug!("token cell stopped during refresh");
                break 'supervise;
            }
            Err(CallError::Backend(e)) => {
                warn!(
                    attempt,
                    error = %e,
                    retry_ms = saturating_millis(policy.retry_delay),
                    "refresh failed, retrying"
                );
                policy.retry_delay
            }
        };
    }

    state.send_replace(RefreshState::Stopped);
    debug!("refresh supervisor stopped");
}
