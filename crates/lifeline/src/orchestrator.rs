//! [`SessionOrchestrator`]: the three ways to open a session.

use std::sync::Arc;

use lifeline_backend::{Backend, BackendConfig, HttpBackend, Token};
use lifeline_transport::{Transport, WebSocketTransport};
use tracing::debug;

use crate::session::{self, Session};
use crate::{LifelineConfig, LifelineError};

/// Opens sessions against one backend and one socket endpoint.
///
/// Each `create_*` call resolves an initial token through the backend and
/// then starts a [`Session`] around it. Only that initial call can fail;
/// everything after it is retried in the background.
///
/// # Example
///
/// ```rust,no_run
/// use lifeline::prelude::*;
///
/// # async fn demo() -> Result<(), LifelineError> {
/// let config = LifelineConfig::builder()
///     .socket_url("wss://rooms.example.com/socket")
///     .room_id("lobby")
///     .build()?;
/// let orchestrator =
///     SessionOrchestrator::http(BackendConfig::new("https://api.example.com"), config)?;
///
/// let session = orchestrator.create_anonymous().await?;
/// let mut snapshots = session.subscribe();
/// while let Some(snapshot) = snapshots.next().await {
///     println!("generation {} version {}", snapshot.generation, snapshot.version);
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionOrchestrator<B, T> {
    backend: Arc<B>,
    transport: Arc<T>,
    config: LifelineConfig,
}

impl<B, T> Clone for SessionOrchestrator<B, T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            transport: Arc::clone(&self.transport),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend, T: Transport> SessionOrchestrator<B, T> {
    /// Validates `config` and wraps the two channels.
    pub fn new(backend: B, transport: T, config: LifelineConfig) -> Result<Self, LifelineError> {
        Self::from_shared(Arc::new(backend), Arc::new(transport), config)
    }

    /// Like [`new`](Self::new), for a backend and transport shared with
    /// other code.
    pub fn from_shared(
        backend: Arc<B>,
        transport: Arc<T>,
        config: LifelineConfig,
    ) -> Result<Self, LifelineError> {
        config.validate()?;
        Ok(Self {
            backend,
            transport,
            config,
        })
    }

    pub fn config(&self) -> &LifelineConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Logs in and starts a session with the returned token.
    pub async fn create_with_login(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Session<B, T>, LifelineError> {
        let token = self.backend.login(name, password).await?;
        debug!("login succeeded");
        Ok(self.start(token))
    }

    /// Resumes with a token from an earlier session.
    ///
    /// The token is refreshed first, which both checks that it is still
    /// good and gives the session a fresh one.
    pub async fn create_with_token(
        &self,
        token: impl Into<Token>,
    ) -> Result<Session<B, T>, LifelineError> {
        let token = self.backend.refresh(&token.into()).await?;
        debug!("resume token accepted");
        Ok(self.start(token))
    }

    /// Starts an anonymous session.
    pub async fn create_anonymous(&self) -> Result<Session<B, T>, LifelineError> {
        let token = self.backend.init().await?;
        debug!("anonymous session issued");
        Ok(self.start(token))
    }

    /// Starts a session around a token that was just issued, without
    /// asking the backend first. Must be called inside a tokio runtime.
    pub fn start(&self, token: Token) -> Session<B, T> {
        session::start(
            Arc::clone(&self.backend),
            Arc::clone(&self.transport),
            self.config.clone(),
            token,
        )
    }
}

impl SessionOrchestrator<HttpBackend, WebSocketTransport> {
    /// The production pairing: `reqwest` for the API, `tokio-tungstenite`
    /// for the room socket.
    pub fn http(backend: BackendConfig, config: LifelineConfig) -> Result<Self, LifelineError> {
        let backend = HttpBackend::from_config(&backend)?;
        Self::new(backend, WebSocketTransport::new(), config)
    }
}
