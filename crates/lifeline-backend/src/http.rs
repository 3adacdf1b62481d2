//! [`HttpBackend`]: the [`Backend`] over HTTP, using `reqwest`.

use std::time::Duration;

use reqwest::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::require_token;
use crate::{
    Backend, BackendError, Credentials, Envelope, PasswordChange, Token,
    TokenData,
};

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where the backend lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base address; endpoint paths are appended to it.
    pub base_url: String,
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Builder for [`HttpBackend`].
#[derive(Debug)]
pub struct HttpBackendBuilder {
    base_url: String,
    timeout: Option<Duration>,
}

impl HttpBackendBuilder {
    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<HttpBackend, BackendError> {
        let http = HttpClient::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;
        Ok(HttpBackend {
            http,
            base_url: self.base_url,
        })
    }
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

/// Talks to the auth endpoints under `base_url`.
///
/// Cheap to clone: `reqwest::Client` is an `Arc` internally.
#[derive(Clone)]
pub struct HttpBackend {
    http: HttpClient,
    base_url: String,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpBackend {
    /// Starts a builder for the given base address.
    pub fn builder(base_url: impl Into<String>) -> HttpBackendBuilder {
        HttpBackendBuilder {
            base_url: base_url.into(),
            timeout: None,
        }
    }

    /// Builds a backend from a [`BackendConfig`].
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        Self::builder(config.base_url.clone())
            .timeout(config.timeout)
            .build()
    }

    /// The base address requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins `base_url` and `path` with exactly one slash between them.
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        token: Option<&Token>,
    ) -> Result<T, BackendError> {
        let mut request = self.http.get(self.endpoint(path));
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token.bearer());
        }
        debug!(path, "GET");
        let response = request.send().await?.error_for_status()?;
        let body = response.bytes().await?;
        open_envelope(&body)
    }

    async fn post<B: Serialize, T: DeserializeOwned + Default>(
        &self,
        path: &str,
        body: &B,
        token: Option<&Token>,
    ) -> Result<T, BackendError> {
        let payload = serde_json::to_vec(body).map_err(BackendError::Encode)?;
        let mut request = self
            .http
            .post(self.endpoint(path))
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token.bearer());
        }
        debug!(path, "POST");
        let response = request.send().await?.error_for_status()?;
        let body = response.bytes().await?;
        open_envelope(&body)
    }
}

/// Checks the `result.success` flag and returns `data`.
///
/// Only a literal `true` counts. The flag is checked on the loose JSON
/// value before `data` is decoded, so a rejected call carries the exact
/// body the backend sent even when its `data` has some other shape.
fn open_envelope<T: DeserializeOwned + Default>(
    body: &[u8],
) -> Result<T, BackendError> {
    let raw: serde_json::Value =
        serde_json::from_slice(body).map_err(BackendError::Decode)?;
    let success = raw
        .get("result")
        .and_then(|result| result.get("success"))
        .and_then(serde_json::Value::as_bool);
    if success != Some(true) {
        return Err(BackendError::Rejected { envelope: raw });
    }
    let envelope: Envelope<T> =
        serde_json::from_value(raw).map_err(BackendError::Decode)?;
    Ok(envelope.data.unwrap_or_default())
}

impl Backend for HttpBackend {
    async fn init(&self) -> Result<Token, BackendError> {
        let data: TokenData = self.get("/auth/init", None).await?;
        require_token("init", data)
    }

    async fn login(
        &self,
        name: &str,
        password: &str,
    ) -> Result<Token, BackendError> {
        let body = Credentials::new(name, password);
        let data: TokenData = self.post("/auth/login", &body, None).await?;
        require_token("login", data)
    }

    async fn refresh(&self, token: &Token) -> Result<Token, BackendError> {
        let data: TokenData = self.get("/auth/refresh", Some(token)).await?;
        require_token("refresh", data)
    }

    async fn register(
        &self,
        token: &Token,
        name: &str,
        password: &str,
    ) -> Result<TokenData, BackendError> {
        let body = Credentials::new(name, password);
        self.post("/auth/register", &body, Some(token)).await
    }

    async fn change(
        &self,
        token: &Token,
        change: &PasswordChange,
    ) -> Result<TokenData, BackendError> {
        self.post("/auth/change", change, Some(token)).await
    }
}
