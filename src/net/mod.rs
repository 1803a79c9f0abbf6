//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Client wants a link
//!     → dial.rs (HTTP upgrade, redirect detection)
//!     → redirect? follow up to the hop bound
//!     → connection.rs (split sink/source, closed-once lifecycle)
//!     → Hand off to the reconnecting client
//!
//! Connection States:
//!     Open → Closing (close notification sent) → Closed (transport released)
//! ```
//!
//! # Design Decisions
//! - Dialing sits behind a trait so the client state machine never sees
//!   the transport
//! - Redirects are an outcome, not an error
//! - Every close path funnels through one idempotent `close()`

pub mod connection;
pub mod dial;

pub use connection::{Connection, ConnectionId};
pub use dial::{dial_following_redirects, DialOutcome, Dialer, WsDialer};

use thiserror::Error;

/// Errors produced while dialing or using a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The target could not be reached or the upgrade failed.
    #[error("dial {target} failed: {reason}")]
    Dial { target: String, reason: String },

    /// The server answered the upgrade with a non-redirect status (e.g. 503).
    #[error("dial {target} rejected with status {status}")]
    Rejected { target: String, status: u16 },

    /// A redirect chain exceeded the hop bound.
    #[error("redirect chain from {origin} exceeded {max_hops} hops")]
    RedirectLoop { origin: String, max_hops: usize },

    /// A redirect pointed somewhere unusable.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),

    /// The connection is closed (locally or by the peer).
    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    /// True for failures that happen before a connection exists.
    pub fn is_dial_failure(&self) -> bool {
        matches!(
            self,
            ConnectionError::Dial { .. }
                | ConnectionError::Rejected { .. }
                | ConnectionError::RedirectLoop { .. }
                | ConnectionError::InvalidTarget(_)
        )
    }
}
