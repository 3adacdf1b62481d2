//! Token ownership for Lifeline sessions.
//!
//! This crate holds the state that every other part of a session reads:
//!
//! 1. **Replay cells**: a current value plus ordered change notification
//!    ([`ReplayCell`])
//! 2. **Token cell**: the single, versioned source of truth for the
//!    session token ([`TokenCell`])
//! 3. **Authenticated calls**: backend calls that read the token when they
//!    start and write rotated tokens back ([`AuthenticatedClient`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Supervisors (above)  ← watch the token cell, refresh it, reconnect on change
//!     ↕
//! Session Layer (this crate)  ← owns the token and serializes calls
//!     ↕
//! Backend Layer (below)  ← provides Token and the Backend trait
//! ```

mod cell;
mod client;
mod error;
mod session;
mod token;

pub use cell::{ReplayCell, Subscription};
pub use client::{AuthenticatedClient, Refreshed, Turn};
pub use error::{CallError, SessionError};
pub use session::SessionSnapshot;
pub use token::{TokenCell, TokenSubscription, VersionedToken, WriteOutcome};
