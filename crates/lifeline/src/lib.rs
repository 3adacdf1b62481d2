//! # Lifeline
//!
//! Keeps an authenticated session and its room socket alive.
//!
//! A client of a remote service talks to it over two channels: a
//! request/response API (login, refresh, credential changes) and a
//! persistent room socket that needs the current token to connect.
//! Lifeline owns the token, refreshes it on a schedule, keeps exactly one
//! socket open with it, and replaces both the client and the socket
//! whenever the token rotates.
//!
//! ## Layers
//!
//! ```text
//! lifeline            SessionOrchestrator, Session, LifelineConfig
//!     ↕
//! lifeline-supervisor RefreshSupervisor, ConnectionSupervisor
//!     ↕
//! lifeline-session    TokenCell, AuthenticatedClient
//!     ↕
//! lifeline-backend    Backend trait, HttpBackend      lifeline-transport  Transport trait, WebSocketTransport
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lifeline::prelude::*;
//!
//! # async fn demo() -> Result<(), LifelineError> {
//! let config = LifelineConfig::builder()
//!     .socket_url("wss://rooms.example.com/socket")
//!     .room_id("lobby")
//!     .build()?;
//! let orchestrator =
//!     SessionOrchestrator::http(BackendConfig::new("https://api.example.com"), config)?;
//! let session = orchestrator.create_with_login("ann", "hunter2").await?;
//! // ...
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod orchestrator;
mod session;

pub use config::{LifelineConfig, LifelineConfigBuilder};
pub use error::LifelineError;
pub use orchestrator::SessionOrchestrator;
pub use session::Session;

pub mod prelude {
    pub use crate::{
        LifelineConfig, LifelineConfigBuilder, LifelineError, Session,
        SessionOrchestrator,
    };
    pub use lifeline_backend::{
        Backend, BackendConfig, BackendError, HttpBackend, Token, TokenData,
    };
    pub use lifeline_session::{
        AuthenticatedClient, CallError, SessionError, SessionSnapshot,
        Subscription, TokenCell,
    };
    pub use lifeline_supervisor::{
        ConnectionEvent, ReconnectPolicy, RefreshPolicy,
    };
    pub use lifeline_transport::{
        Connection, ConnectionId, SocketEvent, Transport, TransportError,
        WebSocketTransport,
    };
}
