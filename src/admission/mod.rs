//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → controller.rs (sample memory, compare with threshold)
//!     → refused? count drop, answer 503
//!     → admitted? counters.rs guard held for the session's lifetime
//!
//! Stats reporter
//!     → sampler.rs (memory, CPU heuristic)
//!     → counters.rs roll_interval() after each report
//! ```
//!
//! # Design Decisions
//! - Counters are an explicit shared object, not process-wide statics
//! - The resource source is a trait so tests can pin utilization

pub mod controller;
pub mod counters;
pub mod sampler;

pub use controller::AdmissionController;
pub use counters::{ConnectionCounters, ConnectionGuard};
pub use sampler::{
    cpu_load_from, estimate_cpu_load, MemorySample, MetricsSource, SyntheticSource, SystemSource,
};
