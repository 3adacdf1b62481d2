//! Background supervisors for Lifeline sessions.
//!
//! Two long-running tasks keep a session healthy:
//!
//! - [`RefreshSupervisor`] refreshes the token on a fixed interval and
//!   retries failed refreshes after a shorter delay, forever.
//! - [`ConnectionSupervisor`] keeps one room socket open with the current
//!   token and reopens it after failures or token changes.
//!
//! Both are spawned onto the tokio runtime and return a
//! [`SupervisorHandle`] that stops them and exposes their state. Neither
//! surfaces steady-state errors: failures are logged at `warn` and
//! retried.
//!
//! # Integration
//!
//! The orchestrator runs both against one token cell and reacts to
//! rotations:
//!
//! ```ignore
//! let (refresh, mut rotations) = RefreshSupervisor::spawn(client.clone(), policy, cancel.child_token());
//! let link = ConnectionSupervisor::spawn(transport, cell, target, reconnect, slot, cancel.child_token());
//! while let Some(rotation) = rotations.recv().await {
//!     // tear down, rebuild around rotation.token
//! }
//! ```

mod connection;
mod handle;
mod policy;
mod refresh;

pub use connection::{
    ConnectionEvent, ConnectionSlot, ConnectionSupervisor, ConnectionTarget,
    EVENT_CAPACITY, LinkState,
};
pub use handle::SupervisorHandle;
pub use policy::{MIN_DELAY, ReconnectPolicy, RefreshPolicy};
pub use refresh::{RefreshState, RefreshSupervisor, Rotation};
