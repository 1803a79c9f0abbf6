//! HTTP registry: a small service-discovery API and its client.
//!
//! # Endpoints
//! - `GET    /services/{service}/instances` → JSON array of records
//! - `PUT    /services/{service}/instances/{instance}` (JSON attribute map) → 204
//! - `DELETE /services/{service}/instances/{instance}` → 204
//! - `GET    /health` → 200 "OK"

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::registry::{InstanceRecord, Registry, RegistryError};

/// Registry client speaking to a [`router`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| RegistryError::Unavailable(format!("registry url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::Unavailable(format!("registry url {} has no path", base_url)));
        }
        Ok(Self { client, base_url })
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn url_with(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn instances_url(&self, service_id: &str) -> Url {
        self.url_with(&["services", service_id, "instances"])
    }

    fn instance_url(&self, service_id: &str, instance_id: &str) -> Url {
        self.url_with(&["services", service_id, "instances", instance_id])
    }
}

fn unavailable(e: reqwest::Error) -> RegistryError {
    RegistryError::Unavailable(e.to_string())
}

fn check_status(resp: &reqwest::Response) -> Result<(), RegistryError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(RegistryError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn list_instances(&self, service_id: &str) -> Result<Vec<InstanceRecord>, RegistryError> {
        let resp = self
            .client
            .get(self.instances_url(service_id))
            .send()
            .await
            .map_err(unavailable)?;
        check_status(&resp)?;
        resp.json::<Vec<InstanceRecord>>()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))
    }

    async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), RegistryError> {
        let resp = self
            .client
            .put(self.instance_url(service_id, instance_id))
            .json(&attributes)
            .send()
            .await
            .map_err(unavailable)?;
        check_status(&resp)
    }

    async fn deregister_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<(), RegistryError> {
        let resp = self
            .client
            .delete(self.instance_url(service_id, instance_id))
            .send()
            .await
            .map_err(unavailable)?;
        check_status(&resp)
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_GATEWAY, self.to_string()).into_response()
    }
}

/// Router serving any [`Registry`] over HTTP.
pub fn router(registry: Arc<dyn Registry>) -> Router {
    Router::new()
        .route("/services/{service}/instances", get(list_handler))
        .route(
            "/services/{service}/instances/{instance}",
            put(register_handler).delete(deregister_handler),
        )
        .route("/health", get(|| async { "OK" }))
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}

async fn list_handler(
    State(registry): State<Arc<dyn Registry>>,
    Path(service): Path<String>,
) -> Result<Json<Vec<InstanceRecord>>, RegistryError> {
    Ok(Json(registry.list_instances(&service).await?))
}

async fn register_handler(
    State(registry): State<Arc<dyn Registry>>,
    Path((service, instance)): Path<(String, String)>,
    Json(attributes): Json<HashMap<String, String>>,
) -> Result<StatusCode, RegistryError> {
    tracing::debug!(service = %service, instance = %instance, "Instance registered");
    registry
        .register_instance(&service, &instance, attributes)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn deregister_handler(
    State(registry): State<Arc<dyn Registry>>,
    Path((service, instance)): Path<(String, String)>,
) -> Result<StatusCode, RegistryError> {
    tracing::info!(service = %service, instance = %instance, "Instance deregistered");
    registry.deregister_instance(&service, &instance).await?;
    Ok(StatusCode::NO_CONTENT)
}
