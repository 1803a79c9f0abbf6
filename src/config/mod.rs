//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI / environment overrides (main.rs)
//!     → FleetConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change (backend only):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<FleetConfig>, threshold applied to admission
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdmissionConfig, ClientConfig, FleetConfig, ObservabilityConfig, ProxyConfig, RegistryConfig,
    ServerConfig, StatsConfig,
};
pub use validation::{parse_ws_target, validate_config, ValidationError};
