//! Periodic stats reporting.
//!
//! # Responsibilities
//! - Sample memory utilization and the CPU load heuristic
//! - Log live connections and dropped counts with the host name
//! - Publish gauges and, when a registry is configured, push this
//!   instance's load
//! - Roll the interval dropped counter with each sample

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::admission::{estimate_cpu_load, AdmissionController};
use crate::config::StatsConfig;
use crate::observability::metrics;
use crate::registry::{
    Registry, RegistryError, ACTIVE_CONNECTIONS, INSTANCE_ADDRESS, INSTANCE_PUBLIC_ADDRESS,
};

/// One report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub memory_percent: f64,
    pub cpu_load: f64,
    pub active_connections: u64,
    pub dropped_interval: u64,
    pub dropped_total: u64,
}

/// Pushes this instance's attributes to a registry.
pub struct RegistryPublisher {
    registry: Arc<dyn Registry>,
    service_id: String,
    instance_id: String,
    address: String,
    public_address: Option<String>,
}

impl RegistryPublisher {
    pub fn new(
        registry: Arc<dyn Registry>,
        service_id: impl Into<String>,
        instance_id: impl Into<String>,
        address: impl Into<String>,
        public_address: Option<String>,
    ) -> Self {
        Self {
            registry,
            service_id: service_id.into(),
            instance_id: instance_id.into(),
            address: address.into(),
            public_address,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn attributes(&self, active: u64) -> HashMap<String, String> {
        let mut attributes = HashMap::from([
            (ACTIVE_CONNECTIONS.to_string(), active.to_string()),
            (INSTANCE_ADDRESS.to_string(), self.address.clone()),
        ]);
        if let Some(public) = &self.public_address {
            attributes.insert(INSTANCE_PUBLIC_ADDRESS.to_string(), public.clone());
        }
        attributes
    }

    /// Register or update this instance with its current load.
    pub async fn publish(&self, active: u64) -> Result<(), RegistryError> {
        self.registry
            .register_instance(&self.service_id, &self.instance_id, self.attributes(active))
            .await
    }

    /// Remove this instance from the registry.
    pub async fn withdraw(&self) -> Result<(), RegistryError> {
        self.registry
            .deregister_instance(&self.service_id, &self.instance_id)
            .await
    }
}

/// Samples and reports admission state on a fixed interval.
pub struct StatsReporter {
    admission: Arc<AdmissionController>,
    interval: Duration,
    cpu_window: Duration,
    publisher: Option<Arc<RegistryPublisher>>,
    hostname: String,
}

impl StatsReporter {
    pub fn new(admission: Arc<AdmissionController>, config: &StatsConfig) -> Self {
        Self {
            admission,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            cpu_window: Duration::from_millis(config.cpu_sample_window_ms),
            publisher: None,
            hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<RegistryPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Override the reporting interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Take one sample, report it, and start a new interval.
    ///
    /// The interval counter is rolled at sampling time, so drops recorded
    /// while the report is published land in the next interval.
    pub async fn tick(&self) -> StatsSnapshot {
        let cpu_load = estimate_cpu_load(self.admission.source().as_ref(), self.cpu_window).await;
        let counters = self.admission.counters();
        let snapshot = StatsSnapshot {
            memory_percent: self.admission.memory_utilization(),
            cpu_load,
            active_connections: counters.active(),
            dropped_interval: counters.roll_interval(),
            dropped_total: counters.dropped_total(),
        };

        tracing::info!(
            hostname = %self.hostname,
            memory_percent = snapshot.memory_percent,
            cpu_load = snapshot.cpu_load,
            active_connections = snapshot.active_connections,
            dropped = snapshot.dropped_interval,
            dropped_total = snapshot.dropped_total,
            "Stats"
        );
        metrics::record_resources(snapshot.memory_percent, snapshot.cpu_load);
        metrics::record_active_connections(snapshot.active_connections);

        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(snapshot.active_connections).await {
                tracing::warn!(
                    instance_id = %publisher.instance_id(),
                    error = %e,
                    "Failed to publish load to registry"
                );
            }
        }

        snapshot
    }

    /// Report every interval until shutdown. The first report is one
    /// interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Stats reporter stopped");
                    return;
                }
            }
        }
    }
}
