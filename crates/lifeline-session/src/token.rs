//! [`TokenCell`]: the single source of truth for a session's current token.
//!
//! Every accepted write bumps a version number. Writers that computed their
//! token from an older snapshot use [`TokenCell::write_after`], and their
//! write is dropped if the cell has moved on in the meantime. That closes
//! the race where a slow call resolves after a newer token was written and
//! would otherwise roll the session back to a stale credential.

use lifeline_backend::Token;

use crate::{ReplayCell, SessionError, Subscription};

/// A token together with the version it was written at.
///
/// The seed token is version 0; each accepted write adds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedToken {
    pub token: Token,
    pub version: u64,
}

/// What happened to a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The token was stored at this version.
    Applied(u64),
    /// The cell had already moved past the writer's base version.
    Stale { current: u64 },
}

/// Subscription to a [`TokenCell`].
pub type TokenSubscription = Subscription<VersionedToken>;

/// Holds the current token of one session and publishes every change.
#[derive(Clone)]
pub struct TokenCell {
    cell: ReplayCell<VersionedToken>,
}

impl std::fmt::Debug for TokenCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCell")
            .field("version", &self.version())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl TokenCell {
    /// Creates a cell seeded with `token` at version 0.
    pub fn new(token: Token) -> Self {
        Self {
            cell: ReplayCell::new(VersionedToken { token, version: 0 }),
        }
    }

    /// The latest token.
    pub fn current(&self) -> Token {
        self.cell.get().token
    }

    /// The latest token and its version.
    pub fn snapshot(&self) -> VersionedToken {
        self.cell.get()
    }

    pub fn version(&self) -> u64 {
        self.cell.get().version
    }

    /// Unconditionally stores `token` as the next version.
    pub fn write(&self, token: Token) -> Result<u64, SessionError> {
        let written = self.cell.update(|current| {
            Some(VersionedToken {
                token,
                version: current.version + 1,
            })
        })?;
        Ok(written.map_or(0, |v| v.version))
    }

    /// Stores `token` only if the cell is still at `base_version`.
    pub fn write_after(
        &self,
        base_version: u64,
        token: Token,
    ) -> Result<WriteOutcome, SessionError> {
        let mut current_version = 0;
        let written = self.cell.update(|current| {
            current_version = current.version;
            (current.version == base_version).then(|| VersionedToken {
                token,
                version: base_version + 1,
            })
        })?;
        Ok(match written {
            Some(v) => WriteOutcome::Applied(v.version),
            None => WriteOutcome::Stale {
                current: current_version,
            },
        })
    }

    /// Current token first, then every later write, until stopped.
    pub fn subscribe(&self) -> TokenSubscription {
        self.cell.subscribe()
    }

    /// Makes the cell terminal. Safe to call more than once.
    pub fn stop(&self) {
        if self.cell.stop() {
            tracing::debug!(version = self.version(), "token cell stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cell.is_stopped()
    }
}
