//! Periodically refreshed snapshot of registered instances.
//!
//! # Design Decisions
//! - The snapshot is an `Arc<[Instance]>` behind a `std::sync::RwLock`; the
//!   refresh loop only swaps the pointer, readers clone it and drop the lock
//! - A failed query keeps the previous snapshot; a successful one replaces
//!   it even when empty

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::load_balancer::{SelectError, Selector};
use crate::observability::metrics;
use crate::registry::{Instance, Registry, RegistryError};

/// Cached view of one service's instances.
pub struct RegistryCache {
    registry: Arc<dyn Registry>,
    service_id: String,
    prefer_public: bool,
    snapshot: RwLock<Arc<[Instance]>>,
}

impl RegistryCache {
    pub fn new(registry: Arc<dyn Registry>, service_id: impl Into<String>, prefer_public: bool) -> Self {
        Self {
            registry,
            service_id: service_id.into(),
            prefer_public,
            snapshot: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<[Instance]> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn replace(&self, instances: Vec<Instance>) {
        let next: Arc<[Instance]> = Arc::from(instances);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Query the registry once and swap in the result.
    ///
    /// Returns the new snapshot size. On error the old snapshot stays.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let records = self.registry.list_instances(&self.service_id).await?;

        let mut seen = HashSet::new();
        let mut instances = Vec::with_capacity(records.len());
        for record in &records {
            let Some(instance) = Instance::from_record(record, self.prefer_public) else {
                tracing::warn!(instance_id = %record.id, "Skipping instance without a usable address");
                continue;
            };
            if !seen.insert(instance.id.clone()) {
                tracing::warn!(instance_id = %instance.id, "Skipping duplicate instance");
                continue;
            }
            instances.push(instance);
        }

        let count = instances.len();
        self.replace(instances);
        metrics::record_registry_instances(count);
        tracing::debug!(service_id = %self.service_id, instances = count, "Registry snapshot refreshed");
        Ok(count)
    }

    /// Pick an instance from the current snapshot.
    pub fn pick_target(&self, selector: &dyn Selector) -> Result<Instance, SelectError> {
        let snapshot = self.snapshot();
        selector.pick(&snapshot).cloned()
    }

    /// Refresh immediately, then every `interval`, until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!(
                            service_id = %self.service_id,
                            error = %e,
                            retained = self.snapshot().len(),
                            "Registry refresh failed, keeping previous snapshot"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(service_id = %self.service_id, "Registry refresh stopped");
                    return;
                }
            }
        }
    }
}
