//! Instance configuration and the immutable descriptor built from it

use crate::identifier::{is_semver, DEFAULT_VERSION};
use crate::{AddressKey, MeshError, Result, ServiceIdentifier};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TRANSPORT: &str = "nats://127.0.0.1:4222";
/// `TRANSPORT` value selecting the in-process bus instead of a server
pub const IN_PROCESS_TRANSPORT: &str = "memory";
pub const DEFAULT_REGISTER_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Options supplied by whoever bootstraps the instance
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub instance_id: String,
    /// Comma-separated transport endpoints
    pub transport: String,
    pub namespace: String,
    pub service: String,
    pub version: String,
    pub stateful: bool,
    pub register_interval: Duration,
    pub call_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_register_interval(mut self, interval: Duration) -> Self {
        self.register_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Overlay the defaults with values from the process environment.
    ///
    /// Reads `TRANSPORT`, `GX_NAMESPACE`, `GX_SERVICE`, `GX_VERSION`,
    /// `GX_STATEFUL`, `GX_REGISTER_INTERVAL_MS` and `GX_CALL_TIMEOUT_MS`.
    /// Unparseable numbers are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(transport) = std::env::var("TRANSPORT") {
            config.transport = transport;
        }
        if let Ok(namespace) = std::env::var("GX_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(service) = std::env::var("GX_SERVICE") {
            config.service = service;
        }
        if let Ok(version) = std::env::var("GX_VERSION") {
            config.version = version;
        }
        if let Ok(stateful) = std::env::var("GX_STATEFUL") {
            config.stateful = matches!(stateful.as_str(), "1" | "true" | "yes");
        }
        if let Some(interval) = env_millis("GX_REGISTER_INTERVAL_MS") {
            config.register_interval = interval;
        }
        if let Some(timeout) = env_millis("GX_CALL_TIMEOUT_MS") {
            config.call_timeout = timeout;
        }

        config
    }

    pub fn in_process(&self) -> bool {
        self.transport.trim() == IN_PROCESS_TRANSPORT
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.transport
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(String::from)
            .collect()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            transport: DEFAULT_TRANSPORT.to_string(),
            namespace: String::new(),
            service: "service".to_string(),
            version: DEFAULT_VERSION.to_string(),
            stateful: false,
            register_interval: DEFAULT_REGISTER_INTERVAL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(e) => {
            warn!("Ignoring {}={}: {}", name, raw, e);
            None
        }
    }
}

/// Identity of a running instance; fixed for its whole lifetime
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    pub identifier: ServiceIdentifier,
    pub instance_id: String,
    pub transport_endpoints: Vec<String>,
    pub stateful: bool,
    pub register_interval: Duration,
    pub call_timeout: Duration,
    pub address: AddressKey,
}

impl ServiceDescriptor {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        if config.service.is_empty() {
            return Err(MeshError::InvalidConfiguration(
                "service name must not be empty".to_string(),
            ));
        }
        if !is_semver(&config.version) {
            return Err(MeshError::InvalidConfiguration(format!(
                "version is not a semantic version: {}",
                config.version
            )));
        }
        if config.register_interval.is_zero() {
            return Err(MeshError::InvalidConfiguration(
                "register interval must be positive".to_string(),
            ));
        }

        let transport_endpoints = config.endpoints();
        let identifier = ServiceIdentifier::new(config.namespace, config.service, config.version);
        let address = identifier.address();

        Ok(Self {
            identifier,
            instance_id: config.instance_id,
            transport_endpoints,
            stateful: config.stateful,
            register_interval: config.register_interval,
            call_timeout: config.call_timeout,
            address,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.identifier.namespace
    }

    pub fn service(&self) -> &str {
        &self.identifier.service
    }

    pub fn version(&self) -> &str {
        &self.identifier.version
    }

    /// Name the instance presents to the transport
    pub fn connection_name(&self) -> String {
        format!("{}@{}", self.service(), self.version()).to_lowercase()
    }
}
