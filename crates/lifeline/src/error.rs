//! Unified error type for Lifeline.

use lifeline_backend::BackendError;
use lifeline_session::{CallError, SessionError};
use lifeline_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Only session-establishing calls and ad hoc authenticated calls return
/// errors. Scheduled refreshes and reconnects never do; they are retried
/// in the background.
#[derive(Debug, thiserror::Error)]
pub enum LifelineError {
    /// A backend call failed (HTTP, rejected envelope, missing token).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The socket target could not be used (bad URL, unknown scheme).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The session was already stopped.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration is incomplete or inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<CallError> for LifelineError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Backend(e) => Self::Backend(e),
            CallError::Session(e) => Self::Session(e),
        }
    }
}
