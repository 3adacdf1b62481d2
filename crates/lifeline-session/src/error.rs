//! Error types for the session layer.

use lifeline_backend::BackendError;

/// Errors that can occur while managing a session's token.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The cell was stopped; it accepts no more writes and its client
    /// makes no more calls.
    #[error("session has been stopped")]
    Stopped,
}

/// Error returned by an [`AuthenticatedClient`](crate::AuthenticatedClient)
/// call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The backend call failed. Passed through unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The client's session ended before the call got its turn; the
    /// backend was never called.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CallError {
    /// `true` if the call never reached the backend because its session
    /// had already ended.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Session(SessionError::Stopped))
    }
}
