//! Data types exchanged with the auth backend.
//!
//! Every response from the backend is wrapped in the same envelope:
//!
//! ```text
//! { "result": { "success": true }, "data": { "token": "..." } }
//! ```
//!
//! Anything other than `success: true` is a hard failure, and the raw
//! envelope is kept as the error detail.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// An opaque bearer credential identifying an authenticated session.
///
/// `Debug` never prints the credential itself, so a token can sit inside
/// any struct that ends up in a log line without leaking.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wraps a raw token string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw token, e.g. for an `Authorization` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the token and returns the raw string.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Formats the token as an `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// The `result` block of every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultFlag {
    /// Only `true` counts as success. A missing field decodes as `false`.
    #[serde(default)]
    pub success: bool,
}

/// The outer shape of every backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub result: ResultFlag,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Builds a success envelope. Mostly useful for test servers.
    pub fn ok(data: T) -> Self {
        Self {
            result: ResultFlag { success: true },
            data: Some(data),
        }
    }
}

/// The `data` payload of an auth response.
///
/// `init`, `login` and `refresh` must carry a token. `register` and
/// `change` may or may not; when they do, the token replaces the one the
/// call was made with. Fields other than `token` are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenData {
    /// Payload carrying only a token.
    pub fn with_token(token: impl Into<Token>) -> Self {
        Self {
            token: Some(token.into()),
            extra: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

/// Body of `login` and `register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub name: String,
    pub password: String,
}

impl Credentials {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }
}

/// Body of `change`. Serialized with the backend's camelCase field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub name: String,
    pub password: String,
    pub new_password: String,
}

impl PasswordChange {
    pub fn new(
        name: impl Into<String>,
        password: impl Into<String>,
        new_password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            new_password: new_password.into(),
        }
    }
}
