//! [`AuthenticatedClient`]: the token-bearing backend calls of one session.
//!
//! Every call reads the token from the session's [`TokenCell`] when it
//! starts, not when the client was created, and writes any token the
//! backend hands back into the cell before returning. The write fans out
//! to every subscriber of the cell, so a password change that rotates the
//! token also reconnects the room socket with it.
//!
//! # Single flight
//!
//! All calls on one client (and all its clones) go through one async lock.
//! A second call waits until the first has written back its token, so two
//! calls can never both start from the same token and race each other's
//! write-back. Calls are still cancel-safe: dropping a pending call
//! releases the lock and writes nothing.
//!
//! A call that gets its turn after the cell was stopped fails with
//! [`SessionError::Stopped`] without calling the backend.
//! [`refresh_detached`](AuthenticatedClient::refresh_detached) hands its
//! turn to the caller as a [`Turn`], so the owner can apply the refreshed
//! token (or stop the cell) before any queued call reads it.

use std::sync::Arc;

use lifeline_backend::{Backend, PasswordChange, Token, TokenData};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{CallError, SessionError, TokenCell, VersionedToken, WriteOutcome};

/// Result of [`AuthenticatedClient::refresh_detached`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refreshed {
    /// The token the backend issued.
    pub token: Token,
    /// The cell version the refresh was made from.
    pub base_version: u64,
}

/// A client's call turn, kept past the end of the call that took it.
///
/// No other call on the client starts while a `Turn` is alive. Dropping it
/// lets the next queued call in.
pub struct Turn(OwnedMutexGuard<()>);

impl std::fmt::Debug for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Turn")
    }
}

/// Wraps `register`, `refresh` and `change` around a [`TokenCell`].
pub struct AuthenticatedClient<B> {
    backend: Arc<B>,
    cell: TokenCell,
    in_flight: Arc<Mutex<()>>,
}

impl<B> Clone for AuthenticatedClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cell: self.cell.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<B> std::fmt::Debug for AuthenticatedClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("cell", &self.cell)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> AuthenticatedClient<B> {
    /// Binds a client to `cell`.
    pub fn new(backend: Arc<B>, cell: TokenCell) -> Self {
        Self {
            backend,
            cell,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// The cell this client reads from and writes to.
    pub fn token_cell(&self) -> &TokenCell {
        &self.cell
    }

    /// The token the next call will use.
    pub fn token(&self) -> Token {
        self.cell.current()
    }

    /// `true` if the two handles share one cell and one lock.
    pub fn same_client(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.in_flight, &other.in_flight)
    }

    /// Attaches credentials to the current session.
    pub async fn register(
        &self,
        name: &str,
        password: &str,
    ) -> Result<TokenData, CallError> {
        let _turn = self.in_flight.lock().await;
        let base = self.open_snapshot()?;
        let data = self.backend.register(&base.token, name, password).await?;
        if let Some(token) = &data.token {
            self.write_back("register", base.version, token.clone());
        }
        Ok(data)
    }

    /// Exchanges the current token for a fresh one and stores it.
    pub async fn refresh(&self) -> Result<Token, CallError> {
        let _turn = self.in_flight.lock().await;
        let base = self.open_snapshot()?;
        let token = self.backend.refresh(&base.token).await?;
        self.write_back("refresh", base.version, token.clone());
        Ok(token)
    }

    /// Changes the account password.
    pub async fn change(
        &self,
        name: &str,
        password: &str,
        new_password: &str,
    ) -> Result<TokenData, CallError> {
        let _turn = self.in_flight.lock().await;
        let base = self.open_snapshot()?;
        let body = PasswordChange::new(name, password, new_password);
        let data = self.backend.change(&base.token, &body).await?;
        if let Some(token) = &data.token {
            self.write_back("change", base.version, token.clone());
        }
        Ok(data)
    }

    /// Refreshes without touching the cell.
    ///
    /// Takes the same turn as the other calls and returns it with the
    /// result: until the [`Turn`] is dropped, no other call on this client
    /// can start. The caller decides what to do with the token;
    /// `base_version` tells it whether the cell has moved on since.
    pub async fn refresh_detached(&self) -> Result<(Refreshed, Turn), CallError> {
        let turn = Arc::clone(&self.in_flight).lock_owned().await;
        let base = self.open_snapshot()?;
        let token = self.backend.refresh(&base.token).await?;
        let refreshed = Refreshed {
            token,
            base_version: base.version,
        };
        Ok((refreshed, Turn(turn)))
    }

    /// The token to call with, unless the session has ended.
    fn open_snapshot(&self) -> Result<VersionedToken, SessionError> {
        if self.cell.is_stopped() {
            return Err(SessionError::Stopped);
        }
        Ok(self.cell.snapshot())
    }

    fn write_back(&self, call: &'static str, base_version: u64, token: Token) {
        match self.cell.write_after(base_version, token) {
            Ok(WriteOutcome::Applied(version)) => {
                tracing::debug!(call, version, "token rotated by call");
            }
            Ok(WriteOutcome::Stale { current }) => {
                tracing::warn!(
                    call,
                    base_version,
                    current,
                    "dropping token from stale call"
                );
            }
            Err(SessionError::Stopped) => {
                tracing::debug!(call, "session stopped before call returned");
            }
        }
    }
}
