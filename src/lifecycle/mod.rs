//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → periodic tasks (cache refresh, stats reporter) stop
//!     token     → clients drain and exit
//!     servers   → stop accepting, finish graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Every periodic task owns an explicit stop handle
//! - Client drain is bounded by the client close timeout

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_on_signal;
