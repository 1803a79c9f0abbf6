//! HTTP servers.
//!
//! # Data Flow
//! ```text
//! Backend (server.rs):
//!     /ws → admission → upgrade → websocket.rs echo session
//!     /health, /load-shedding → health probes
//!
//! Proxy (proxy.rs):
//!     /ws → registry cache → least-loaded → 307 redirect
//!
//! Registry (registry::http::router):
//!     /services/{service}/instances[/{instance}]
//! ```

pub mod proxy;
pub mod server;
pub mod websocket;

pub use proxy::ProxyServer;
pub use server::{advertise_address, resolve_instance_id, AppState, BackendServer};

use axum::Router;
use tokio::net::TcpListener;

use crate::lifecycle::Shutdown;

/// Serve a plain router until `shutdown` fires.
pub async fn serve(listener: TcpListener, app: Router, shutdown: Shutdown) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
