//! Room socket transport for Lifeline.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the connection
//! supervisor is written against, plus the parameters ([`ConnectParams`])
//! and event feed ([`SocketEvent`]) every transport speaks.
//!
//! Transports never reconnect on their own. Every `connect` is a fresh
//! socket (`forceNew`), and reconnection is owned entirely by the caller.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket client via `tokio-tungstenite`

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;

use url::Url;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Connect parameters
// ---------------------------------------------------------------------------

/// Everything needed to open one room socket.
///
/// The room and the token travel as query parameters:
/// `ws://host/path?roomId=<room>&token=<token>`.
#[derive(Clone)]
pub struct ConnectParams {
    pub url: String,
    pub room_id: String,
    /// Raw bearer token. Kept as a plain string so this crate doesn't
    /// depend on the backend crate.
    pub token: String,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("url", &self.url)
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}

impl ConnectParams {
    pub fn new(
        url: impl Into<String>,
        room_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            room_id: room_id.into(),
            token: token.into(),
        }
    }

    /// Renders the full connect URL.
    ///
    /// `http`/`https` are accepted and mapped to `ws`/`wss`, since the
    /// socket endpoint is usually configured next to the HTTP one.
    pub fn to_url(&self) -> Result<Url, TransportError> {
        let mut url =
            Url::parse(&self.url).map_err(|source| TransportError::InvalidUrl {
                url: self.url.clone(),
                source,
            })?;

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(TransportError::UnsupportedScheme(other.into())),
        };
        if url.scheme() != scheme {
            url.set_scheme(scheme).map_err(|()| {
                TransportError::UnsupportedScheme(url.scheme().to_string())
            })?;
        }

        url.query_pairs_mut()
            .append_pair("roomId", &self.room_id)
            .append_pair("token", &self.token);
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Socket events
// ---------------------------------------------------------------------------

/// One item from a connection's event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The handshake completed.
    Connected,
    /// A data frame from the server.
    Data(Vec<u8>),
    /// The handshake failed.
    ConnectError(String),
    /// The handshake did not complete in time.
    ConnectTimeout,
    /// An open socket went away.
    Disconnect(String),
}

impl SocketEvent {
    /// `true` for the events that end a connection:
    /// `connect_error`, `connect_timeout` and `disconnect`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectError(_) | Self::ConnectTimeout | Self::Disconnect(_)
        )
    }

    /// The event's wire name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connect",
            Self::Data(_) => "data",
            Self::ConnectError(_) => "connect_error",
            Self::ConnectTimeout => "connect_timeout",
            Self::Disconnect(_) => "disconnect",
        }
    }
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectError(reason) | Self::Disconnect(reason) => {
                write!(f, "{}: {reason}", self.name())
            }
            Self::Data(bytes) => write!(f, "data ({} bytes)", bytes.len()),
            _ => f.write_str(self.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Opens room sockets.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new socket.
    ///
    /// Returns as soon as a handle exists; the handshake outcome arrives
    /// on the handle's event feed. An `Err` here means the attempt could
    /// not even start (bad URL and the like).
    fn connect(
        &self,
        params: &ConnectParams,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single live socket.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for the next event.
    ///
    /// Returns `None` once the feed is exhausted; callers treat that as a
    /// disconnect. Must be cancel-safe: dropping the future loses nothing.
    fn next_event(&self) -> impl Future<Output = Option<SocketEvent>> + Send;

    /// Sends a binary frame to the server.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Closes the socket. Calling it again is a no-op.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
