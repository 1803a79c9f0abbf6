//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy /ws request
//!     → registry cache snapshot (Arc<[Instance]>)
//!     → Selector::pick (least_loaded.rs)
//!     → redirect to the chosen instance, or 503 when empty
//! ```
//!
//! # Design Decisions
//! - Selectors are stateless and never block
//! - Selection reads a snapshot; it never sees a partial refresh

pub mod least_loaded;

pub use least_loaded::LeastLoaded;

use thiserror::Error;

use crate::registry::Instance;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no instances available")]
    NoInstances,
}

/// Chooses one instance from a snapshot.
pub trait Selector: Send + Sync {
    fn pick<'a>(&self, instances: &'a [Instance]) -> Result<&'a Instance, SelectError>;
}
