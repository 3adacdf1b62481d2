//! [`SupervisorHandle`]: stop and observe a spawned supervisor task.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owner's end of a supervisor task.
///
/// `S` is the supervisor's observable state. Dropping the handle cancels
/// the task without waiting for it; [`stop`](Self::stop) cancels and waits.
pub struct SupervisorHandle<S> {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<S>,
}

impl<S> std::fmt::Debug for SupervisorHandle<S>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("state", &*self.state.borrow())
            .field("stopped", &self.task.is_none())
            .finish()
    }
}

impl<S: Clone> SupervisorHandle<S> {
    pub(crate) fn new(
        cancel: CancellationToken,
        task: JoinHandle<()>,
        state: watch::Receiver<S>,
    ) -> Self {
        Self {
            cancel,
            task: Some(task),
            state,
        }
    }

    /// The supervisor's state right now.
    pub fn state(&self) -> S {
        self.state.borrow().clone()
    }

    /// A receiver that is notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<S> {
        self.state.clone()
    }

    /// `true` once the task has exited, for any reason.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancels the task and waits until it has released everything it
    /// owned. Calling it again returns immediately.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "supervisor task panicked");
                }
            }
        }
    }
}

impl<S> Drop for SupervisorHandle<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
