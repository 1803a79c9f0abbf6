//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fleet_active_connections` (gauge): admitted sessions on this instance
//! - `fleet_dropped_requests_total` (counter): upgrades refused by admission
//! - `fleet_memory_utilization_percent` (gauge)
//! - `fleet_cpu_load_percent` (gauge)
//! - `fleet_registry_instances` (gauge): entries in the proxy's snapshot
//! - `fleet_client_reconnects_total` (counter)
//! - `fleet_proxy_redirects_total` (counter)
//!
//! # Design Decisions
//! - Recording functions are free functions; with no recorder installed
//!   they are no-ops, so library code records unconditionally
//! - The exporter is only installed when metrics are enabled in config

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics initialization failed: {0}")]
    Init(String),
}

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Init(e.to_string()))?;
    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    describe_gauge!(
        "fleet_active_connections",
        "Websocket sessions currently admitted on this instance"
    );
    describe_counter!(
        "fleet_dropped_requests_total",
        "Upgrade requests refused by the admission controller"
    );
    describe_gauge!(
        "fleet_memory_utilization_percent",
        "Memory in use as a percentage of reserved memory"
    );
    describe_gauge!("fleet_cpu_load_percent", "Estimated CPU load");
    describe_gauge!(
        "fleet_registry_instances",
        "Instances in the proxy's registry snapshot"
    );
    describe_counter!(
        "fleet_client_reconnects_total",
        "Client reconnects after a lost connection"
    );
    describe_counter!(
        "fleet_proxy_redirects_total",
        "Upgrade requests redirected by the proxy"
    );
}

pub fn record_active_connections(active: u64) {
    gauge!("fleet_active_connections").set(active as f64);
}

pub fn record_dropped_request() {
    counter!("fleet_dropped_requests_total").increment(1);
}

pub fn record_resources(memory_percent: f64, cpu_load: f64) {
    gauge!("fleet_memory_utilization_percent").set(memory_percent);
    gauge!("fleet_cpu_load_percent").set(cpu_load);
}

pub fn record_registry_instances(count: usize) {
    gauge!("fleet_registry_instances").set(count as f64);
}

pub fn record_reconnect() {
    counter!("fleet_client_reconnects_total").increment(1);
}

pub fn record_redirect(instance: &str) {
    counter!("fleet_proxy_redirects_total", "instance" => instance.to_string()).increment(1);
}
