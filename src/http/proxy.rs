//! Redirecting proxy.
//!
//! # Data Flow
//! ```text
//! Client GET /ws
//!     → registry cache snapshot
//!     → least-loaded instance
//!     → 307 Location: {scheme}://{address}{path}
//!     → empty snapshot: 503
//! ```
//!
//! # Design Decisions
//! - The proxy never carries websocket traffic; clients follow the redirect
//! - Selection never blocks on the registry; it reads the last snapshot

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::health;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{LeastLoaded, SelectError, Selector};
use crate::observability::metrics;
use crate::registry::{Instance, RegistryCache};

#[derive(Clone)]
struct ProxyState {
    cache: Arc<RegistryCache>,
    selector: Arc<dyn Selector>,
    scheme: Arc<str>,
    path: Arc<str>,
}

impl ProxyState {
    fn location(&self, instance: &Instance) -> String {
        format!("{}://{}{}", self.scheme, instance.address, self.path)
    }
}

/// The redirecting proxy server.
pub struct ProxyServer {
    state: ProxyState,
    refresh_interval: Duration,
    request_timeout: Duration,
}

impl ProxyServer {
    pub fn new(cache: Arc<RegistryCache>, config: &ProxyConfig, request_timeout: Duration) -> Self {
        Self {
            state: ProxyState {
                cache,
                selector: Arc::new(LeastLoaded::new()),
                scheme: Arc::from(config.backend_scheme.as_str()),
                path: Arc::from(config.backend_path.as_str()),
            },
            refresh_interval: Duration::from_secs(config.refresh_interval_secs.max(1)),
            request_timeout,
        }
    }

    /// Replace the selection strategy.
    pub fn with_selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.state.selector = selector;
        self
    }

    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(redirect_handler))
            .route("/health", get(health::health))
            .with_state(self.state.clone())
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    /// Start the registry refresh loop and serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service_id = %self.state.cache.service_id(),
            refresh_interval = ?self.refresh_interval,
            "Proxy server starting"
        );

        let refresher = tokio::spawn(
            self.state
                .cache
                .clone()
                .run(self.refresh_interval, shutdown.subscribe()),
        );

        let stop = shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { stop.wait().await })
            .await?;

        if let Err(e) = refresher.await {
            tracing::error!(error = %e, "Registry refresh task failed");
        }
        tracing::info!("Proxy server stopped");
        Ok(())
    }
}

async fn redirect_handler(State(state): State<ProxyState>) -> Response {
    match state.cache.pick_target(state.selector.as_ref()) {
        Ok(instance) => {
            let location = state.location(&instance);
            tracing::info!(
                instance_id = %instance.id,
                load = instance.load,
                location = %location,
                "Redirecting client"
            );
            metrics::record_redirect(&instance.id);
            Redirect::temporary(&location).into_response()
        }
        Err(SelectError::NoInstances) => {
            tracing::warn!("No instances available for redirect");
            (StatusCode::SERVICE_UNAVAILABLE, "No instances available").into_response()
        }
    }
}
