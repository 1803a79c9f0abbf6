//! Backend websocket server.
//!
//! # Responsibilities
//! - Serve `/ws` behind the admission controller (503 when shedding load)
//! - Serve `/health` and `/load-shedding`
//! - Run the stats reporter and keep the registry entry current
//! - Apply reloaded configuration (load-shedding threshold)
//! - Deregister and close sessions on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admission::AdmissionController;
use crate::config::{FleetConfig, ServerConfig};
use crate::health;
use crate::http::websocket::echo_session;
use crate::lifecycle::Shutdown;
use crate::observability::{RegistryPublisher, StatsReporter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub config: Arc<ArcSwap<FleetConfig>>,
    pub sessions: CancellationToken,
}

/// The backend server.
pub struct BackendServer {
    state: AppState,
    publisher: Option<Arc<RegistryPublisher>>,
    stats_interval: Option<Duration>,
}

impl BackendServer {
    pub fn new(config: FleetConfig, admission: Arc<AdmissionController>) -> Self {
        let state = AppState {
            admission,
            config: Arc::new(ArcSwap::from_pointee(config)),
            sessions: CancellationToken::new(),
        };
        Self {
            state,
            publisher: None,
            stats_interval: None,
        }
    }

    /// Publish this instance's load to a registry.
    pub fn with_publisher(mut self, publisher: Arc<RegistryPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Override the stats interval from config.
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router. Only the plain HTTP probes carry a request timeout.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let timeout = Duration::from_secs(self.state.config.load().server.request_timeout_secs);
        let probes = Router::new()
            .route("/health", get(health::health))
            .route("/load-shedding", get(load_shedding_handler))
            .layer(TimeoutLayer::new(timeout));

        Router::new()
            .route("/ws", get(ws_handler))
            .merge(probes)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: Shutdown,
        config_updates: Option<mpsc::UnboundedReceiver<FleetConfig>>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config.load_full();
        tracing::info!(
            address = %addr,
            threshold = self.state.admission.threshold(),
            "Backend server starting"
        );

        if let Some(publisher) = &self.publisher {
            match publisher.publish(0).await {
                Ok(()) => tracing::info!(instance_id = %publisher.instance_id(), "Registered with registry"),
                Err(e) => tracing::warn!(error = %e, "Initial registration failed, will retry on next report"),
            }
        }

        let mut reporter = StatsReporter::new(self.state.admission.clone(), &config.stats);
        if let Some(interval) = self.stats_interval {
            reporter = reporter.with_interval(interval);
        }
        if let Some(publisher) = &self.publisher {
            reporter = reporter.with_publisher(publisher.clone());
        }
        let stats = tokio::spawn(reporter.run(shutdown.subscribe()));

        let reload = config_updates.map(|updates| {
            tokio::spawn(apply_reloads(self.state.clone(), updates, shutdown.subscribe()))
        });

        let app = self.router();
        let stop = shutdown.clone();
        let sessions = self.state.sessions.clone();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                stop.wait().await;
                sessions.cancel();
            })
            .await?;

        if let Err(e) = stats.await {
            tracing::error!(error = %e, "Stats reporter task failed");
        }
        if let Some(reload) = reload {
            let _ = reload.await;
        }
        if let Some(publisher) = &self.publisher {
            match publisher.withdraw().await {
                Ok(()) => tracing::info!(instance_id = %publisher.instance_id(), "Deregistered from registry"),
                Err(e) => tracing::warn!(error = %e, "Deregistration failed"),
            }
        }

        tracing::info!("Backend server stopped");
        Ok(())
    }
}

async fn apply_reloads(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<FleetConfig>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(new_config) = update else { return };
                state.admission.set_threshold(new_config.admission.threshold_percent);
                state.config.store(Arc::new(new_config));
                tracing::info!("Configuration reloaded");
            }
            _ = shutdown.recv() => return,
        }
    }
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if !state.admission.admit() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response();
    }

    let guard = state.admission.track();
    let idle = match state.config.load().server.idle_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| async move {
        echo_session(socket, guard, idle, sessions).await;
    })
}

async fn load_shedding_handler(State(state): State<AppState>) -> impl IntoResponse {
    health::load_shedding_status(&state.admission)
}

/// Registry instance id: configured, or `ws-` plus a random suffix.
pub fn resolve_instance_id(config: &ServerConfig) -> String {
    match &config.instance_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            let uuid = uuid::Uuid::new_v4().simple().to_string();
            format!("ws-{}", &uuid[..12])
        }
    }
}

/// Address published for other fleet members to dial.
///
/// Uses `advertise_address` when configured; otherwise the bound address,
/// with an unspecified IP replaced by loopback.
pub fn advertise_address(config: &ServerConfig, bound: SocketAddr) -> String {
    if let Some(address) = &config.advertise_address {
        return address.clone();
    }
    if bound.ip().is_unspecified() {
        let loopback = match bound {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        };
        return SocketAddr::new(loopback, bound.port()).to_string();
    }
    bound.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_prefers_config() {
        let mut config = ServerConfig::default();
        config.instance_id = Some("i-0abc".to_string());
        assert_eq!(resolve_instance_id(&config), "i-0abc");

        config.instance_id = None;
        let generated = resolve_instance_id(&config);
        assert!(generated.starts_with("ws-"));
        assert_eq!(generated.len(), 15);
        assert_ne!(generated, resolve_instance_id(&config));
    }

    #[test]
    fn advertise_address_replaces_unspecified_ip() {
        let config = ServerConfig::default();
        let bound: SocketAddr = "0.0.0.0:9001".parse().unwrap();
        assert_eq!(advertise_address(&config, bound), "127.0.0.1:9001");

        let bound: SocketAddr = "10.1.2.3:9001".parse().unwrap();
        assert_eq!(advertise_address(&config, bound), "10.1.2.3:9001");

        let mut config = ServerConfig::default();
        config.advertise_address = Some("backend-1:8080".to_string());
        assert_eq!(advertise_address(&config, bound), "backend-1:8080");
    }
}
