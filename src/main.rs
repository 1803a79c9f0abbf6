//! ws-fleet
//!
//! One binary, four roles:
//!
//! ```text
//!   client fleet ──GET /ws──▶ proxy ──307──▶ client follows redirect
//!        │                      │
//!        │                      └── refresh ◀── registry ◀── stats push ──┐
//!        │                                                                │
//!        └────────────── websocket (heartbeats, echo) ──▶ backend server ─┘
//!                                                        (admission: 503
//!                                                         above threshold)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;

use ws_fleet::admission::{AdmissionController, ConnectionCounters, SystemSource};
use ws_fleet::client::Fleet;
use ws_fleet::config::watcher::ConfigWatcher;
use ws_fleet::config::{load_config, validate_config, ConfigError, FleetConfig};
use ws_fleet::http::{self, advertise_address, resolve_instance_id, BackendServer, ProxyServer};
use ws_fleet::lifecycle::{shutdown_on_signal, Shutdown};
use ws_fleet::net::WsDialer;
use ws_fleet::observability::{init_logging, metrics, RegistryPublisher};
use ws_fleet::registry::{self, HttpRegistry, MemoryRegistry, Registry, RegistryCache};

#[derive(Parser)]
#[command(name = "ws-fleet", version)]
#[command(about = "Resilient websocket fleet: clients, backends, proxy and registry", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "WS_FLEET_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directives (RUST_LOG wins when set).
    #[arg(long, env = "WS_FLEET_LOG", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Run a backend websocket server with load shedding
    Server(ServerArgs),
    /// Run the redirecting proxy
    Proxy(ProxyArgs),
    /// Run a fleet of reconnecting clients
    Client(ClientArgs),
    /// Run an in-memory instance registry over HTTP
    Registry(RegistryArgs),
}

#[derive(Clone, Args)]
struct ServerArgs {
    #[arg(long, env = "WS_FLEET_BIND")]
    bind: Option<String>,
    /// Memory utilization percent above which upgrades are refused.
    #[arg(long, env = "WS_FLEET_THRESHOLD")]
    threshold: Option<u8>,
    #[arg(long, env = "WS_FLEET_REGISTRY_URL")]
    registry_url: Option<String>,
    #[arg(long, env = "WS_FLEET_SERVICE_ID")]
    service_id: Option<String>,
    #[arg(long, env = "WS_FLEET_INSTANCE_ID")]
    instance_id: Option<String>,
    #[arg(long, env = "WS_FLEET_ADVERTISE_ADDRESS")]
    advertise_address: Option<String>,
    #[arg(long, env = "WS_FLEET_PUBLIC_ADDRESS")]
    public_address: Option<String>,
    /// Stats interval in seconds.
    #[arg(long, env = "WS_FLEET_STATS_INTERVAL")]
    stats_interval: Option<u64>,
}

#[derive(Clone, Args)]
struct ProxyArgs {
    #[arg(long, env = "WS_FLEET_BIND")]
    bind: Option<String>,
    #[arg(long, env = "WS_FLEET_REGISTRY_URL")]
    registry_url: Option<String>,
    #[arg(long, env = "WS_FLEET_SERVICE_ID")]
    service_id: Option<String>,
    /// Redirect to instances' public addresses when published.
    #[arg(long)]
    prefer_public: bool,
}

#[derive(Clone, Args)]
struct ClientArgs {
    /// Number of concurrent connections.
    connections: Option<usize>,
    /// Websocket URL to dial first, e.g. ws://proxy:8080/ws
    target: Option<String>,
    #[arg(long)]
    heartbeat_ms: Option<u64>,
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long)]
    retry_delay_ms: Option<u64>,
}

#[derive(Clone, Args)]
struct RegistryArgs {
    #[arg(long, env = "WS_FLEET_BIND")]
    bind: Option<String>,
}

impl Command {
    /// Fold flags and environment overrides into the file configuration.
    fn apply(&self, config: &mut FleetConfig) {
        match self {
            Command::Server(args) => {
                set(&mut config.server.bind_address, &args.bind);
                set(&mut config.admission.threshold_percent, &args.threshold);
                set(&mut config.registry.service_id, &args.service_id);
                set(&mut config.stats.interval_secs, &args.stats_interval);
                if args.registry_url.is_some() {
                    config.registry.url = args.registry_url.clone();
                }
                if args.instance_id.is_some() {
                    config.server.instance_id = args.instance_id.clone();
                }
                if args.advertise_address.is_some() {
                    config.server.advertise_address = args.advertise_address.clone();
                }
                if args.public_address.is_some() {
                    config.server.public_address = args.public_address.clone();
                }
            }
            Command::Proxy(args) => {
                set(&mut config.proxy.bind_address, &args.bind);
                set(&mut config.registry.service_id, &args.service_id);
                if args.registry_url.is_some() {
                    config.registry.url = args.registry_url.clone();
                }
                if args.prefer_public {
                    config.proxy.prefer_public_address = true;
                }
            }
            Command::Client(args) => {
                set(&mut config.client.connections, &args.connections);
                set(&mut config.client.target, &args.target);
                set(&mut config.client.heartbeat_interval_ms, &args.heartbeat_ms);
                set(&mut config.client.max_retries, &args.max_retries);
                set(&mut config.client.retry_delay_ms, &args.retry_delay_ms);
            }
            Command::Registry(args) => {
                set(&mut config.registry.bind_address, &args.bind);
            }
        }
    }
}

impl Cli {
    /// Flag and environment overrides, reapplied on every config reload.
    fn overrides(&self) -> impl Fn(&mut FleetConfig) + Send + Sync + 'static {
        let command = self.command.clone();
        let log_level = self.log_level.clone();
        move |config: &mut FleetConfig| {
            command.apply(config);
            if let Some(level) = &log_level {
                config.observability.log_level = level.clone();
            }
        }
    }
}

fn set<T: Clone>(field: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *field = v.clone();
    }
}

fn http_registry(config: &FleetConfig) -> Result<Option<Arc<dyn Registry>>, Box<dyn std::error::Error>> {
    match &config.registry.url {
        Some(url) => {
            let timeout = Duration::from_secs(config.registry.timeout_secs);
            let registry: Arc<dyn Registry> = Arc::new(HttpRegistry::new(url, timeout)?);
            Ok(Some(registry))
        }
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FleetConfig::default(),
    };
    let overrides = cli.overrides();
    overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "ws-fleet starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Metrics exporter not started");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    match &cli.command {
        Command::Server(_) => run_server(config, cli.config.clone(), overrides, shutdown).await?,
        Command::Proxy(_) => run_proxy(config, shutdown).await?,
        Command::Client(_) => run_client(config, shutdown).await?,
        Command::Registry(_) => {
            let listener = TcpListener::bind(&config.registry.bind_address).await?;
            let store: Arc<dyn Registry> = Arc::new(MemoryRegistry::new());
            http::serve(listener, registry::router(store), shutdown).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_server(
    config: FleetConfig,
    config_path: Option<PathBuf>,
    overrides: impl Fn(&mut FleetConfig) + Send + Sync + 'static,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let bound = listener.local_addr()?;

    let admission = Arc::new(AdmissionController::new(
        config.admission.threshold_percent,
        Arc::new(ConnectionCounters::new()),
        Arc::new(SystemSource::new()),
    ));

    let mut server = BackendServer::new(config.clone(), admission);
    if let Some(registry) = http_registry(&config)? {
        let publisher = RegistryPublisher::new(
            registry,
            config.registry.service_id.clone(),
            resolve_instance_id(&config.server),
            advertise_address(&config.server, bound),
            config.server.public_address.clone(),
        );
        tracing::info!(
            instance_id = %publisher.instance_id(),
            service_id = %config.registry.service_id,
            "Publishing load to registry"
        );
        server = server.with_publisher(Arc::new(publisher));
    }

    // The watcher handle must outlive the server.
    let (updates, _watcher) = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path, config.clone());
            let watcher = watcher.with_overrides(overrides);
            match watcher.run() {
                Ok(handle) => (Some(updates), Some(handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, None)
                }
            }
        }
        None => (None, None),
    };

    server.run(listener, shutdown, updates).await?;
    Ok(())
}

async fn run_proxy(config: FleetConfig, shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let Some(registry) = http_registry(&config)? else {
        return Err("proxy requires registry.url (or --registry-url)".into());
    };
    let cache = Arc::new(RegistryCache::new(
        registry,
        config.registry.service_id.clone(),
        config.proxy.prefer_public_address,
    ));
    let listener = TcpListener::bind(&config.proxy.bind_address).await?;
    let server = ProxyServer::new(
        cache,
        &config.proxy,
        Duration::from_secs(config.server.request_timeout_secs),
    );
    server.run(listener, shutdown).await?;
    Ok(())
}

async fn run_client(config: FleetConfig, shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let dialer = Arc::new(WsDialer::new(
        Duration::from_millis(config.client.connect_timeout_ms),
        Duration::from_millis(config.client.close_timeout_ms),
    ));
    let fleet = Fleet::from_config(&config.client, dialer, shutdown.token())?;
    fleet.wait().await;
    Ok(())
}
