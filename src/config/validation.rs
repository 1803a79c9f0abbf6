//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (threshold in 1..=100, intervals > 0)
//! - Check that addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FleetConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::FleetConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate every section of the configuration.
pub fn validate_config(config: &FleetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "server.bind_address", &config.server.bind_address);
    check_socket_addr(&mut errors, "proxy.bind_address", &config.proxy.bind_address);
    check_socket_addr(&mut errors, "registry.bind_address", &config.registry.bind_address);

    let threshold = config.admission.threshold_percent;
    if threshold == 0 || threshold > 100 {
        errors.push(ValidationError::new(
            "admission.threshold_percent",
            format!("must be between 1 and 100, got {}", threshold),
        ));
    }

    if let Err(e) = parse_ws_target(&config.client.target) {
        errors.push(e);
    }
    if config.client.connections == 0 {
        errors.push(ValidationError::new("client.connections", "must be at least 1"));
    }
    if config.client.max_retries == 0 {
        errors.push(ValidationError::new("client.max_retries", "must be at least 1"));
    }

    let non_zero = [
        ("client.heartbeat_interval_ms", config.client.heartbeat_interval_ms),
        ("client.close_timeout_ms", config.client.close_timeout_ms),
        ("client.connect_timeout_ms", config.client.connect_timeout_ms),
        ("stats.interval_secs", config.stats.interval_secs),
        ("proxy.refresh_interval_secs", config.proxy.refresh_interval_secs),
        ("registry.timeout_secs", config.registry.timeout_secs),
        ("server.request_timeout_secs", config.server.request_timeout_secs),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }

    if !matches!(config.proxy.backend_scheme.as_str(), "ws" | "wss") {
        errors.push(ValidationError::new(
            "proxy.backend_scheme",
            format!("expected ws or wss, got {:?}", config.proxy.backend_scheme),
        ));
    }
    if !config.proxy.backend_path.starts_with('/') {
        errors.push(ValidationError::new("proxy.backend_path", "must start with '/'"));
    }

    if let Some(url) = &config.registry.url {
        match Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => errors.push(ValidationError::new(
                "registry.url",
                format!("unsupported scheme {:?}", parsed.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("registry.url", e.to_string())),
        }
    }
    if config.registry.service_id.trim().is_empty() {
        errors.push(ValidationError::new("registry.service_id", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse a client target, accepting only `ws://` URLs.
///
/// The client dialer is built without TLS, so `wss://` targets are refused
/// here rather than failing on every dial.
pub fn parse_ws_target(target: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(target)
        .map_err(|e| ValidationError::new("client.target", format!("{}: {}", target, e)))?;
    match url.scheme() {
        "ws" if url.host_str().is_some() => Ok(url),
        "ws" => Err(ValidationError::new("client.target", "missing host")),
        other => Err(ValidationError::new(
            "client.target",
            format!("unsupported scheme {:?}", other),
        )),
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("{:?} is not a socket address", value),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&FleetConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = FleetConfig::default();
        config.admission.threshold_percent = 0;
        config.client.target = "http://example.com/ws".to_string();
        config.stats.interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "admission.threshold_percent",
                "client.target",
                "stats.interval_secs"
            ]
        );
    }

    #[test]
    fn target_must_be_websocket_url() {
        assert!(parse_ws_target("ws://127.0.0.1:8080/ws").is_ok());
        assert!(parse_ws_target("wss://fleet.example.com/ws").is_err());
        assert!(parse_ws_target("not a url").is_err());
        assert!(parse_ws_target("ftp://host/ws").is_err());
    }
}
