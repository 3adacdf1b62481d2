/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket URL could not be parsed.
    #[error("invalid socket url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The URL scheme is not one this transport can dial.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}
