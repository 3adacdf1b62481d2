//! The [`Backend`] trait: the five auth calls the session layer relies on.
//!
//! The orchestrator never talks HTTP directly. It is generic over a
//! `Backend`, so production code plugs in [`HttpBackend`](crate::HttpBackend)
//! and tests plug in a scripted in-memory backend.

use std::future::Future;

use crate::{BackendError, PasswordChange, Token, TokenData};

/// The request/response side of the remote service.
///
/// `Send + Sync + 'static` because one backend is shared (behind an `Arc`)
/// by every supervisor task of every session generation.
///
/// Methods return `impl Future + Send` so callers can drive them from
/// spawned tasks. Implementors can still write plain `async fn`.
pub trait Backend: Send + Sync + 'static {
    /// Anonymous session: `GET /auth/init`.
    fn init(&self) -> impl Future<Output = Result<Token, BackendError>> + Send;

    /// Named session: `POST /auth/login`.
    fn login(
        &self,
        name: &str,
        password: &str,
    ) -> impl Future<Output = Result<Token, BackendError>> + Send;

    /// Exchanges a still-valid token for a fresh one: `GET /auth/refresh`.
    fn refresh(
        &self,
        token: &Token,
    ) -> impl Future<Output = Result<Token, BackendError>> + Send;

    /// Attaches credentials to the session behind `token`.
    fn register(
        &self,
        token: &Token,
        name: &str,
        password: &str,
    ) -> impl Future<Output = Result<TokenData, BackendError>> + Send;

    /// Changes the password of the account behind `token`.
    fn change(
        &self,
        token: &Token,
        change: &PasswordChange,
    ) -> impl Future<Output = Result<TokenData, BackendError>> + Send;
}

/// Pulls the token out of a response that must carry one.
pub fn require_token(
    endpoint: &'static str,
    data: TokenData,
) -> Result<Token, BackendError> {
    data.token.ok_or(BackendError::MissingToken { endpoint })
}
