//! WebSocket client transport using `tokio-tungstenite`.
//!
//! Each connection is a small actor: a driver task owns the socket, dials
//! it, pumps inbound frames onto the event feed and writes queued outbound
//! frames. The [`WebSocketConnection`] handle only holds channel ends, so
//! it is cheap to share behind an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    ConnectParams, Connection, ConnectionId, SocketEvent, Transport,
    TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Default handshake timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound on the closing handshake. A peer that stops reading
/// gets its socket dropped after this long.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A WebSocket-based [`Transport`] that dials room sockets.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Sets how long a handshake may take before `connect_timeout` fires.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets how long `close()` waits for the Close frame to go out.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<Self::Connection, Self::Error> {
        let url = params.to_url()?;
        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let driver = tokio::spawn(drive(
            id,
            url,
            self.connect_timeout,
            self.close_timeout,
            event_tx,
            outbound_rx,
            shutdown.clone(),
        ));
        tracing::debug!(%id, room_id = %params.room_id, "dialing room socket");

        Ok(WebSocketConnection {
            id,
            events: Mutex::new(event_rx),
            outbound: outbound_tx,
            shutdown,
            driver: Mutex::new(Some(driver)),
        })
    }
}

/// A single WebSocket client connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    events: Mutex<mpsc::UnboundedReceiver<SocketEvent>>,
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn next_event(&self) -> Option<SocketEvent> {
        self.events.lock().await.recv().await
    }

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.outbound
            .send(Message::Binary(data.to_vec().into()))
            .map_err(|_| {
                TransportError::ConnectionClosed(format!(
                    "{} driver has stopped",
                    self.id
                ))
            })
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.shutdown.cancel();
        // Wait for the driver so the Close frame is out before we return.
        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            let _ = driver.await;
            tracing::debug!(id = %self.id, "room socket closed");
        }
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

async fn drive(
    id: ConnectionId,
    url: Url,
    connect_timeout: Duration,
    close_timeout: Duration,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shutdown: CancellationToken,
) {
    let dial = tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    );

    let ws = tokio::select! {
        _ = shutdown.cancelled() => return,
        dialed = dial => match dialed {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                tracing::debug!(%id, error = %e, "handshake failed");
                let _ = events.send(SocketEvent::ConnectError(e.to_string()));
                return;
            }
            Err(_) => {
                tracing::debug!(%id, "handshake timed out");
                let _ = events.send(SocketEvent::ConnectTimeout);
                return;
            }
        },
    };
    let _ = events.send(SocketEvent::Connected);

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // Closed by our side: no disconnect event, the owner
                // already knows.
                let handshake = async {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                };
                if tokio::time::timeout(close_timeout, handshake).await.is_err() {
                    tracing::debug!(%id, "close handshake timed out, dropping socket");
                }
                return;
            }
            Some(msg) = outbound.recv() => {
                // A peer that stops reading must not keep close() waiting.
                let sent = tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!(%id, "closed with a frame still unsent");
                        return;
                    }
                    sent = sink.send(msg) => sent,
                };
                if let Err(e) = sent {
                    let _ = events.send(SocketEvent::Disconnect(e.to_string()));
                    return;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(SocketEvent::Data(data.to_vec()));
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Data(
                        text.as_str().as_bytes().to_vec(),
                    ));
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(SocketEvent::Disconnect(
                        "closed by server".into(),
                    ));
                    return;
                }
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    let _ = events.send(SocketEvent::Disconnect(e.to_string()));
                    return;
                }
            },
        }
    }
}
