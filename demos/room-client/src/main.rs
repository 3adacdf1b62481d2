//! Opens an anonymous session against a live backend and logs every
//! rotation and socket event until Ctrl-C.
//!
//! ```text
//! LIFELINE_BACKEND_URL=http://localhost:8080 \
//! LIFELINE_SOCKET_URL=ws://localhost:8081/socket \
//! LIFELINE_ROOM_ID=lobby \
//! RUST_LOG=info,lifeline=debug \
//!     cargo run -p room-client
//! ```

use std::time::Duration;

use lifeline::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

fn var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn millis(name: &str) -> Result<Option<Duration>, Box<dyn std::error::Error>> {
    match std::env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .map_err(|e| format!("{name}={raw:?}: {e}"))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}

fn config_from_env() -> Result<LifelineConfig, Box<dyn std::error::Error>> {
    let mut builder = LifelineConfig::builder()
        .socket_url(var("LIFELINE_SOCKET_URL", "ws://localhost:8081/socket"))
        .room_id(var("LIFELINE_ROOM_ID", "lobby"));
    if let Some(d) = millis("LIFELINE_REFRESH_INTERVAL_MS")? {
        builder = builder.refresh_interval(d);
    }
    if let Some(d) = millis("LIFELINE_REFRESH_RETRY_MS")? {
        builder = builder.refresh_retry_delay(d);
    }
    if let Some(d) = millis("LIFELINE_RECONNECT_DELAY_MS")? {
        builder = builder.reconnect_delay(d);
    }
    Ok(builder.build()?)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config_from_env()?;
    let backend = BackendConfig::new(var("LIFELINE_BACKEND_URL", "http://localhost:8080"));
    let orchestrator = SessionOrchestrator::http(backend, config)?;

    let session = orchestrator.create_anonymous().await?;
    let mut snapshots = session.subscribe();
    let mut events = session.events();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            snapshot = snapshots.next() => match snapshot {
                Some(s) => info!(generation = s.generation, version = s.version, "session"),
                None => break,
            },
            event = events.recv() => match event {
                Ok(ConnectionEvent::Data(id, bytes)) => {
                    info!(conn_id = %id, len = bytes.len(), "data");
                }
                Ok(other) => info!(event = ?other, "socket"),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop().await;
    Ok(())
}
