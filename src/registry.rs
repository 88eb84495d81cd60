//! Maps service names to the containers that implement them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::types::Service;

/// Port a service manager serves its control plane on inside its container.
pub const DEFAULT_CONTROL_PORT: u16 = 50052;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub image: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Extra environment on top of `CONFIG_DIR` and `INSTANCE_ID`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Extra bind mounts on top of the runtime socket and config dir.
    #[serde(default)]
    pub binds: Vec<String>,
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

impl ServiceSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            control_port: DEFAULT_CONTROL_PORT,
            env: BTreeMap::new(),
            binds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    specs: HashMap<Service, ServiceSpec>,
}

impl ServiceRegistry {
    /// Registry with the services every agent knows about.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.insert(
            Service::from("LB"),
            ServiceSpec::new("quay.io/opencopilot/haproxy-manager:latest"),
        );
        registry
    }

    /// Built-ins overlaid with configured entries.
    pub fn with_overrides(overrides: &BTreeMap<String, ServiceSpec>) -> Self {
        let mut registry = Self::builtin();
        for (name, spec) in overrides {
            registry.insert(Service::new(name.as_str()), spec.clone());
        }
        registry
    }

    pub fn insert(&mut self, service: Service, spec: ServiceSpec) {
        self.specs.insert(service, spec);
    }

    pub fn resolve(&self, service: &Service) -> Result<&ServiceSpec> {
        self.specs
            .get(service)
            .ok_or_else(|| AgentError::UnsupportedService(service.to_string()))
    }

    /// Control port for a running service, falling back to the default for
    /// containers whose service has since left the registry.
    pub fn control_port(&self, service: &Service) -> u16 {
        self.specs
            .get(service)
            .map(|spec| spec.control_port)
            .unwrap_or(DEFAULT_CONTROL_PORT)
    }
}
