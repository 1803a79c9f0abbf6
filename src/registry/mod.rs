//! Instance registry subsystem.
//!
//! # Data Flow
//! ```text
//! Backend stats reporter
//!     → register_instance(service, id, {ACTIVE_CONNECTIONS, INSTANCE_ADDRESS, ...})
//!
//! Proxy refresh loop
//!     → list_instances(service)
//!     → Instance::from_record (skip unusable records)
//!     → cache.rs (atomic snapshot swap)
//!     → selector picks from the snapshot
//! ```
//!
//! # Design Decisions
//! - The registry is a trait; `memory.rs` and `http.rs` implement it
//! - Records carry free-form string attributes; only the cache interprets them

pub mod cache;
pub mod http;
pub mod memory;

pub use cache::RegistryCache;
pub use http::{router, HttpRegistry};
pub use memory::MemoryRegistry;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute holding the live connection count.
pub const ACTIVE_CONNECTIONS: &str = "ACTIVE_CONNECTIONS";
/// Attribute holding the address other fleet members dial.
pub const INSTANCE_ADDRESS: &str = "INSTANCE_ADDRESS";
/// Attribute holding an optional externally reachable address.
pub const INSTANCE_PUBLIC_ADDRESS: &str = "INSTANCE_PUBLIC_ADDRESS";

/// A raw registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// A selectable backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub id: String,
    pub address: String,
    pub load: u64,
}

impl Instance {
    /// Interpret a record. Returns `None` when it has no usable address.
    ///
    /// With `prefer_public`, the public address wins when present. A missing
    /// or unparsable load counts as 0.
    pub fn from_record(record: &InstanceRecord, prefer_public: bool) -> Option<Self> {
        let usable = |key: &str| {
            record
                .attributes
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let private = usable(INSTANCE_ADDRESS);
        let public = usable(INSTANCE_PUBLIC_ADDRESS);
        let address = if prefer_public {
            public.or(private)
        } else {
            private.or(public)
        }?;

        let load = record
            .attributes
            .get(ACTIVE_CONNECTIONS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        Some(Self {
            id: record.id.clone(),
            address: address.to_string(),
            load,
        })
    }
}

/// Errors talking to a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry returned status {0}")]
    Status(u16),

    #[error("invalid registry response: {0}")]
    InvalidResponse(String),
}

/// Service discovery backend.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Every instance registered under `service_id`, in registration order.
    async fn list_instances(&self, service_id: &str) -> Result<Vec<InstanceRecord>, RegistryError>;

    /// Create or replace an instance's attributes.
    async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), RegistryError>;

    /// Remove an instance. Removing an unknown instance is not an error.
    async fn deregister_instance(&self, service_id: &str, instance_id: &str)
        -> Result<(), RegistryError>;
}
