//! [`LifelineConfig`] and its builder.

use std::time::Duration;

use lifeline_supervisor::{ConnectionTarget, ReconnectPolicy, RefreshPolicy};
use lifeline_transport::ConnectParams;
use serde::{Deserialize, Serialize};

use crate::LifelineError;

/// Everything a session needs besides the backend and transport.
///
/// Deserializable, so callers can keep it in whatever file format they
/// like:
///
/// ```json
/// {
///   "socket_url": "wss://rooms.example.com/socket",
///   "room_id": "lobby",
///   "refresh": { "interval_ms": 600000, "retry_delay_ms": 5000 },
///   "reconnect": { "retry_delay_ms": 3000 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifelineConfig {
    /// Room socket endpoint. `ws`, `wss`, `http` and `https` are accepted.
    pub socket_url: String,
    /// Room to join; sent as the `roomId` query parameter.
    pub room_id: String,
    #[serde(default)]
    pub refresh: RefreshPolicy,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl LifelineConfig {
    /// A config with default policies.
    pub fn new(socket_url: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            socket_url: socket_url.into(),
            room_id: room_id.into(),
            refresh: RefreshPolicy::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn builder() -> LifelineConfigBuilder {
        LifelineConfigBuilder::new()
    }

    /// Checks that the socket target is usable.
    ///
    /// Policies are not checked here; the supervisors clamp them.
    pub fn validate(&self) -> Result<(), LifelineError> {
        if self.room_id.is_empty() {
            return Err(LifelineError::Config("room_id must not be empty".into()));
        }
        ConnectParams::new(&self.socket_url, &self.room_id, "").to_url()?;
        Ok(())
    }

    pub(crate) fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new(&self.socket_url, &self.room_id)
    }
}

/// Builder for [`LifelineConfig`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use lifeline::LifelineConfig;
///
/// let config = LifelineConfig::builder()
///     .socket_url("wss://rooms.example.com/socket")
///     .room_id("lobby")
///     .refresh_interval(Duration::from_secs(300))
///     .build()
///     .unwrap();
/// assert_eq!(config.refresh.interval, Duration::from_secs(300));
/// ```
#[derive(Debug, Default)]
pub struct LifelineConfigBuilder {
    socket_url: Option<String>,
    room_id: Option<String>,
    refresh: RefreshPolicy,
    reconnect: ReconnectPolicy,
}

impl LifelineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    pub fn room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Replaces the whole refresh policy.
    pub fn refresh(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = policy;
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh.interval = interval;
        self
    }

    pub fn refresh_retry_delay(mut self, delay: Duration) -> Self {
        self.refresh.retry_delay = delay;
        self
    }

    /// Replaces the whole reconnect policy.
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect.retry_delay = delay;
        self
    }

    pub fn reconnect_jitter(mut self, jitter: Duration) -> Self {
        self.reconnect.jitter = jitter;
        self
    }

    /// Builds and validates the config.
    pub fn build(self) -> Result<LifelineConfig, LifelineError> {
        let socket_url = self
            .socket_url
            .ok_or_else(|| LifelineError::Config("socket_url is required".into()))?;
        let room_id = self
            .room_id
            .ok_or_else(|| LifelineError::Config("room_id is required".into()))?;
        let config = LifelineConfig {
            socket_url,
            room_id,
            refresh: self.refresh,
            reconnect: self.reconnect,
        };
        config.validate()?;
        Ok(config)
    }
}
