//! Reconnecting client subsystem.
//!
//! # Data Flow
//! ```text
//! Fleet::spawn (ids 1..=N)
//!     → ReconnectingClient::run per id
//!     → dial (follow redirects) → retry / fall back on failure
//!     → connected: read task + heartbeat loop
//!     → loss → reconnect delay → dial again
//!     → cancellation → draining → exit
//! ```

pub mod fleet;
pub mod reconnect;
pub mod state;

pub use fleet::Fleet;
pub use reconnect::{Inbound, ReconnectingClient};
pub use state::{ClientState, ClientStatus, RetryState};

use thiserror::Error;

use crate::config::ValidationError;

/// Errors raised while setting up clients. Fatal only to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid target: {0}")]
    InvalidTarget(#[from] ValidationError),

    #[error("at least one connection is required")]
    NoConnections,
}
