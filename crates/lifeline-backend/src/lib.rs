//! Auth backend client for Lifeline.
//!
//! This crate is the request/response half of the remote service:
//!
//! - **Types** ([`Token`], [`Envelope`], [`TokenData`], [`Credentials`],
//!   [`PasswordChange`]) are the shapes that travel over HTTP.
//! - **API** ([`Backend`] trait) lists the five calls the session layer
//!   needs: `init`, `login`, `refresh`, `register`, `change`.
//! - **HTTP** ([`HttpBackend`]) implements them with `reqwest`.
//! - **Errors** ([`BackendError`]) cover everything a call can fail with.
//!
//! # Feature Flags
//!
//! - `http` (default): [`HttpBackend`] via `reqwest`

mod api;
mod error;
#[cfg(feature = "http")]
mod http;
mod types;

pub use api::{Backend, require_token};
pub use error::BackendError;
#[cfg(feature = "http")]
pub use http::{BackendConfig, HttpBackend, HttpBackendBuilder};
pub use types::{
    Credentials, Envelope, PasswordChange, ResultFlag, Token, TokenData,
};
