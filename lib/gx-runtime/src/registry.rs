//! Registry of live services, fed by registration heartbeats

use crate::liveness::LivenessConfig;
use chrono::{DateTime, Utc};
use gx_core::{AddressKey, MeshError, MethodMetadata, RegistrationDescriptor, Result, ServiceIdentifier};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// ServiceRegistry maintains the services currently announcing themselves
pub struct ServiceRegistry {
    // Map of address key to the latest heartbeat seen for it
    services: Arc<RwLock<HashMap<AddressKey, ServiceInfo>>>,
}

/// Information about a registered service
#[derive(Clone, Debug)]
pub struct ServiceInfo {
    pub address: AddressKey,
    pub identifier: ServiceIdentifier,
    pub methods: BTreeMap<String, MethodMetadata>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub heartbeats: u64,
    /// Heartbeat interval the service announced, else the last observed gap
    /// between two of its heartbeats
    pub interval: Option<Duration>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a service or refresh it from a heartbeat received at `now`
    pub async fn record_heartbeat(&self, registration: RegistrationDescriptor, now: DateTime<Utc>) -> AddressKey {
        let address = registration.address();
        let announced = registration.announced_interval();

        let mut services = self.services.write().await;
        match services.get_mut(&address) {
            Some(service) => {
                let observed = (now - service.last_seen).to_std().ok().filter(|gap| !gap.is_zero());
                service.interval = announced.or(observed).or(service.interval);
                service.methods = registration.methods;
                service.last_seen = now;
                service.heartbeats += 1;
            }
            None => {
                let identifier = ServiceIdentifier::new(
                    registration.namespace,
                    registration.service,
                    registration.version,
                );
                debug!("Registered service: {} ({})", identifier, address);
                services.insert(
                    address.clone(),
                    ServiceInfo {
                        address: address.clone(),
                        identifier,
                        methods: registration.methods,
                        first_seen: now,
                        last_seen: now,
                        heartbeats: 1,
                        interval: announced,
                    },
                );
            }
        }

        address
    }

    /// Get service information
    pub async fn get_service(&self, address: &AddressKey) -> Result<ServiceInfo> {
        let services = self.services.read().await;
        services
            .get(address)
            .cloned()
            .ok_or_else(|| MeshError::ServiceNotFound(address.to_string()))
    }

    /// Remove every service silent for longer than `liveness` tolerates at
    /// that service's own heartbeat interval
    pub async fn evict_stale(&self, now: DateTime<Utc>, liveness: &LivenessConfig) -> Vec<ServiceInfo> {
        let mut services = self.services.write().await;
        let stale: Vec<AddressKey> = services
            .values()
            .filter(|service| {
                let allowed = chrono::Duration::from_std(liveness.max_silence_for(service.interval))
                    .unwrap_or_else(|_| chrono::Duration::max_value());
                now - service.last_seen > allowed
            })
            .map(|service| service.address.clone())
            .collect();

        stale
            .iter()
            .filter_map(|address| services.remove(address))
            .collect()
    }

    /// Get count of registered services
    pub async fn service_count(&self) -> usize {
        let services = self.services.read().await;
        services.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
