//! [`ReplayCell`]: a value that announces every change to its subscribers.
//!
//! New subscribers get the current value immediately, then every later
//! value in write order. Nothing older than the current value is replayed.
//!
//! ```text
//!   set(a)        set(b)        subscribe()       set(c)        stop()
//!     │             │               │               │              │
//!  sub1: a ──────── b ───────────────────────────── c ──────────── end
//!  sub2:                            b ───────────── c ──────────── end
//! ```
//!
//! Each subscriber owns an unbounded queue, so a slow reader never misses
//! a value and never blocks a writer. Notification happens under the same
//! lock as the mutation, which is what keeps the order identical for every
//! subscriber.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::SessionError;

struct Inner<T> {
    value: T,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    stopped: bool,
}

impl<T: Clone> Inner<T> {
    /// Stores `value` and fans it out, dropping subscribers that went away.
    fn publish(&mut self, value: T) {
        self.value = value;
        let value = &self.value;
        self.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

/// A shared current value with ordered change notification.
///
/// Cloning the cell clones the handle, not the value: every clone sees and
/// publishes to the same subscribers.
pub struct ReplayCell<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for ReplayCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> ReplayCell<T> {
    /// Creates a live cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value,
                subscribers: Vec::new(),
                stopped: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Nothing panics while holding the lock, but if something ever
        // does, the value is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the current value. Still works after `stop()`.
    pub fn get(&self) -> T {
        self.lock().value.clone()
    }

    /// Replaces the value and notifies every subscriber.
    ///
    /// # Errors
    /// [`SessionError::Stopped`] once the cell is terminal.
    pub fn set(&self, value: T) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.stopped {
            return Err(SessionError::Stopped);
        }
        inner.publish(value);
        Ok(())
    }

    /// Atomic read-modify-write.
    ///
    /// `f` sees the current value and returns `Some(next)` to publish it or
    /// `None` to leave the cell untouched. Returns whatever was published.
    pub fn update<F>(&self, f: F) -> Result<Option<T>, SessionError>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        let mut inner = self.lock();
        if inner.stopped {
            return Err(SessionError::Stopped);
        }
        match f(&inner.value) {
            Some(next) => {
                inner.publish(next.clone());
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    /// Subscribes to the cell.
    ///
    /// The current value is queued immediately. On a stopped cell the
    /// subscription is already complete and yields nothing.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if !inner.stopped {
            // Can't fail: we hold the receiver.
            let _ = tx.send(inner.value.clone());
            inner.subscribers.push(tx);
        }
        Subscription { rx }
    }

    /// Makes the cell terminal.
    ///
    /// Subscribers drain whatever is already queued and then complete.
    /// Returns `false` if the cell was already stopped.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        if inner.stopped {
            return false;
        }
        inner.stopped = true;
        inner.subscribers.clear();
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Number of live subscribers. Closed ones are pruned on the next write.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// The receiving end of a [`ReplayCell`] subscription.
///
/// Dropping it unsubscribes. Also usable as a [`Stream`].
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Waits for the next value. `None` once the cell is stopped and the
    /// queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns a queued value without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}
