//! Error types for the backend layer.
//!
//! Every variant is a CallFailure from the caller's point of view, except
//! [`BackendError::MissingToken`], which flags a success envelope that is
//! missing the token it must carry. Supervisors treat that one like any
//! other failed refresh and retry it.

/// Errors returned by a [`Backend`](crate::Backend) call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP layer failed: connect error, timeout, or a non-2xx status.
    #[cfg(feature = "http")]
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A request body could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The response body was not a valid envelope.
    #[error("malformed response: {0}")]
    Decode(#[source] serde_json::Error),

    /// The envelope said `success !== true`. Carries the raw envelope.
    #[error("backend rejected the call: {envelope}")]
    Rejected { envelope: serde_json::Value },

    /// A success envelope without the token this endpoint must return.
    #[error("{endpoint} succeeded without returning a token")]
    MissingToken { endpoint: &'static str },

    /// Anything a non-HTTP backend implementation needs to report.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Returns `true` for a response that broke the envelope contract
    /// rather than a failed call.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::MissingToken { .. } | Self::Decode(_))
    }
}
