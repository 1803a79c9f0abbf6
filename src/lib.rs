//! Resilient websocket fleet.
//!
//! Reconnecting clients, load-shedding backends, and a redirecting proxy
//! that steers new clients to the least-loaded backend.

// Connections and clients
pub mod client;
pub mod net;

// Server side
pub mod admission;
pub mod health;
pub mod http;
pub mod load_balancer;
pub mod registry;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use client::{Fleet, ReconnectingClient};
pub use config::FleetConfig;
pub use http::{BackendServer, ProxyServer};
pub use lifecycle::Shutdown;
