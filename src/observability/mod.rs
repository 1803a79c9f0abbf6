//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Backend:
//!     → stats.rs (periodic sample → log, gauges, registry push)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → Instance registry (proxy selection)
//! ```

pub mod logging;
pub mod metrics;
pub mod stats;

pub use logging::init_logging;
pub use stats::{RegistryPublisher, StatsReporter, StatsSnapshot};
