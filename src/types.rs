//! Data structures shared by the reconciliation pipeline.
//!
//! Services are plain names; the agent never persists a mapping between
//! a service and a container.  Correlation happens through container
//! labels every time the runtime is queried.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A logical service name such as `LB`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Service(String);

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Service {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Unordered set of services, unique by name.
pub type ServiceSet = BTreeSet<Service>;

/// Services to start and stop for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationDiff {
    pub to_start: ServiceSet,
    pub to_stop: ServiceSet,
}

impl ReconciliationDiff {
    pub fn is_empty(&self) -> bool {
        self.to_start.is_empty() && self.to_stop.is_empty()
    }
}

/// A published port of a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub private_port: u16,
    pub public_port: Option<u16>,
}

/// A container as observed through the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub image: String,
    /// Names without the leading `/` the engine reports.
    pub names: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
}

impl ContainerRecord {
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Host port published for `private_port`, if any.
    pub fn published_port(&self, private_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .filter(|p| p.private_port == private_port)
            .find_map(|p| p.public_port)
    }
}

/// Query for [`crate::runtime::ContainerRuntime::list`].
///
/// `labels` entries are either `key` or `key=value`; `name` is matched by
/// the engine as a substring, so callers needing an exact match must
/// re-check [`ContainerRecord::has_name`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    pub labels: Vec<String>,
    pub name: Option<String>,
}

/// Everything needed to create a managed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub privileged: bool,
    pub auto_remove: bool,
    pub publish_all_ports: bool,
}

/// Which step of the pipeline failed for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Configure,
}

/// A per-service failure collected during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceFailure {
    pub service: Service,
    pub action: Action,
    pub error: String,
}

/// Outcome of one configuration handler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub started: Vec<Service>,
    pub stopped: Vec<Service>,
    pub configured: Vec<Service>,
    pub skipped: Vec<Service>,
    pub failures: Vec<ServiceFailure>,
}

/// A managed container as reported by the status API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub id: String,
    pub image: String,
    pub service: Option<Service>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub instance_id: String,
    pub reconciling: bool,
    pub watch_index: u64,
    pub services: Vec<ServiceStatus>,
}
