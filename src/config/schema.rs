//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the fleet.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration shared by every role (server, proxy, client, registry).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// Backend websocket server settings.
    pub server: ServerConfig,

    /// Redirecting proxy settings.
    pub proxy: ProxyConfig,

    /// Client fleet settings.
    pub client: ClientConfig,

    /// Load shedding settings.
    pub admission: AdmissionConfig,

    /// Stats reporter settings.
    pub stats: StatsConfig,

    /// Instance registry settings.
    pub registry: RegistryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Address other processes use to reach this instance ("host:port").
    /// Defaults to the bind address when unset.
    pub advertise_address: Option<String>,

    /// Optional public address published alongside the private one.
    pub public_address: Option<String>,

    /// Instance identifier in the registry. Generated when unset.
    pub instance_id: Option<String>,

    /// Close a websocket after this many seconds without inbound traffic (0 = never).
    pub idle_timeout_secs: u64,

    /// Timeout for plain HTTP endpoints (health, load shedding).
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            advertise_address: None,
            public_address: None,
            instance_id: None,
            idle_timeout_secs: 0,
            request_timeout_secs: 10,
        }
    }
}

/// Proxy configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Bind address for the redirecting proxy.
    pub bind_address: String,

    /// Registry cache refresh interval in seconds.
    pub refresh_interval_secs: u64,

    /// Scheme used in the redirect `Location` ("ws" or "wss").
    pub backend_scheme: String,

    /// Path appended to the chosen backend address.
    pub backend_path: String,

    /// Redirect to the instance's public address when it publishes one.
    pub prefer_public_address: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            refresh_interval_secs: 10,
            backend_scheme: "ws".to_string(),
            backend_path: "/ws".to_string(),
            prefer_public_address: false,
        }
    }
}

/// Client fleet configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Websocket URL dialed first (usually the proxy).
    pub target: String,

    /// Number of concurrent client connections.
    pub connections: usize,

    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Delay between failed dial attempts in milliseconds.
    pub retry_delay_ms: u64,

    /// Consecutive failures before falling back to the original target.
    pub max_retries: u32,

    /// Delay before redialing after a lost connection in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Upper bound for the graceful close handshake in milliseconds.
    pub close_timeout_ms: u64,

    /// Dial (TCP + upgrade) timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Maximum redirect hops followed per attempt.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: "ws://127.0.0.1:8080/ws".to_string(),
            connections: 5,
            heartbeat_interval_ms: 5_000,
            retry_delay_ms: 5_000,
            max_retries: 3,
            reconnect_delay_ms: 1_000,
            close_timeout_ms: 1_000,
            connect_timeout_ms: 10_000,
            max_redirects: 3,
        }
    }
}

/// Load shedding configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Memory utilization (percent) above which new connections are rejected.
    pub threshold_percent: u8,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 50,
        }
    }
}

/// Stats reporter configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Reporting interval in seconds.
    pub interval_secs: u64,

    /// Wall-clock window for the CPU load estimate in milliseconds.
    pub cpu_sample_window_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            cpu_sample_window_ms: 100,
        }
    }
}

/// Instance registry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the registry service. No registry is used when unset.
    pub url: Option<String>,

    /// Service identifier instances register under.
    pub service_id: String,

    /// Registry request timeout in seconds.
    pub timeout_secs: u64,

    /// Bind address when running the registry service itself.
    pub bind_address: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_id: "ws-fleet".to_string(),
            timeout_secs: 5,
            bind_address: "0.0.0.0:8500".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
