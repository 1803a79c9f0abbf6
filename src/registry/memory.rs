//! In-process registry.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::registry::{InstanceRecord, Registry, RegistryError};

/// Registry held in memory, keyed by service id.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    services: DashMap<String, Vec<InstanceRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list_instances(&self, service_id: &str) -> Result<Vec<InstanceRecord>, RegistryError> {
        Ok(self
            .services
            .get(service_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        attributes: HashMap<String, String>,
    ) -> Result<(), RegistryError> {
        let mut instances = self.services.entry(service_id.to_string()).or_default();
        match instances.iter_mut().find(|r| r.id == instance_id) {
            Some(existing) => existing.attributes = attributes,
            None => instances.push(InstanceRecord {
                id: instance_id.to_string(),
                attributes,
            }),
        }
        Ok(())
    }

    async fn deregister_instance(
        &self,
        service_id: &str,
        instance_id: &str,
    ) -> Result<(), RegistryError> {
        if let Some(mut instances) = self.services.get_mut(service_id) {
            instances.retain(|r| r.id != instance_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(load: &str) -> HashMap<String, String> {
        HashMap::from([("ACTIVE_CONNECTIONS".to_string(), load.to_string())])
    }

    #[tokio::test]
    async fn register_keeps_order_and_replaces() {
        let registry = MemoryRegistry::new();
        registry.register_instance("svc", "a", attrs("1")).await.unwrap();
        registry.register_instance("svc", "b", attrs("2")).await.unwrap();
        registry.register_instance("svc", "a", attrs("9")).await.unwrap();

        let listed = registry.list_instances("svc").await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(listed[0].attributes["ACTIVE_CONNECTIONS"], "9");
    }

    #[tokio::test]
    async fn deregister_removes_only_that_instance() {
        let registry = MemoryRegistry::new();
        registry.register_instance("svc", "a", attrs("1")).await.unwrap();
        registry.register_instance("svc", "b", attrs("2")).await.unwrap();
        registry.deregister_instance("svc", "a").await.unwrap();
        registry.deregister_instance("svc", "missing").await.unwrap();

        let listed = registry.list_instances("svc").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "b");
        assert!(registry.list_instances("other").await.unwrap().is_empty());
    }
}
