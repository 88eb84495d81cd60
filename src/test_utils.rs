//! Recording mocks for the agent's collaborators.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::lifecycle::{container_name, MANAGED_LABEL, SERVICE_LABEL};
use crate::registry::DEFAULT_CONTROL_PORT;
use crate::rpc::ControlPlane;
use crate::runtime::ContainerRuntime;
use crate::store::{ConfigStore, KvPair, Listing};
use crate::types::{ContainerFilter, ContainerRecord, ContainerSpec, PortBinding, Service};

pub fn kv(key: &str, value: &str) -> KvPair {
    KvPair::new(key, value)
}

pub fn managed_container(id: &str, service: &str) -> ContainerRecord {
    let mut record = unmanaged_container(id, service);
    record.labels.insert(MANAGED_LABEL.to_string(), String::new());
    record
}

/// Looks like a managed service but lacks the managed label.
pub fn unmanaged_container(id: &str, service: &str) -> ContainerRecord {
    ContainerRecord {
        id: id.to_string(),
        image: format!("example/{}", service.to_lowercase()),
        names: vec![container_name(&Service::from(service))],
        labels: BTreeMap::from([(SERVICE_LABEL.to_string(), service.to_string())]),
        ports: Vec::new(),
    }
}

impl ContainerRecord {
    pub fn with_port(mut self, private_port: u16, public_port: u16) -> Self {
        self.ports.push(PortBinding {
            private_port,
            public_port: Some(public_port),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    List(ContainerFilter),
    Pull(String),
    Create(ContainerSpec),
    Start(String),
    Stop(String),
    Remove(String),
}

#[derive(Default)]
struct RuntimeState {
    running: Vec<ContainerRecord>,
    created: HashMap<String, ContainerSpec>,
    calls: Vec<RuntimeCall>,
    next_id: u16,
}

/// In-memory engine: started containers show up in listings with their
/// control port published; stopped ones disappear as if auto-removed.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<RuntimeState>,
    fail_list: bool,
    fail_pull: bool,
    fail_start: bool,
    failing_stops: HashSet<String>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_containers(containers: Vec<ContainerRecord>) -> Self {
        let runtime = Self::new();
        runtime.state.lock().unwrap().running = containers;
        runtime
    }

    pub fn fail_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn fail_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Makes stopping container `id` fail; it keeps running.
    pub fn fail_stop(mut self, id: &str) -> Self {
        self.failing_stops.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(*c)).count()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RuntimeCall::Stop(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn running(&self) -> Vec<ContainerRecord> {
        self.state.lock().unwrap().running.clone()
    }

    fn record(&self, call: RuntimeCall) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn matches_filter(container: &ContainerRecord, filter: &ContainerFilter) -> bool {
    let labels_match = filter.labels.iter().all(|label| match label.split_once('=') {
        Some((key, value)) => container.labels.get(key).map(String::as_str) == Some(value),
        None => container.labels.contains_key(label),
    });
    // The engine matches names by substring.
    let name_matches = filter
        .name
        .as_ref()
        .map_or(true, |name| container.names.iter().any(|n| n.contains(name.as_str())));
    labels_match && name_matches
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerRecord>> {
        self.record(RuntimeCall::List(filter.clone()));
        if self.fail_list {
            return Err(AgentError::Runtime("list failed".into()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .running
            .iter()
            .filter(|c| matches_filter(c, filter))
            .cloned()
            .collect())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.record(RuntimeCall::Pull(image.to_string()));
        if self.fail_pull {
            return Err(AgentError::Runtime(format!("pull of {} failed", image)));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(RuntimeCall::Create(spec.clone()));
        let mut state = self.state.lock().unwrap();
        let taken = state.running.iter().any(|c| c.has_name(&spec.name))
            || state.created.values().any(|s| s.name == spec.name);
        if taken {
            return Err(AgentError::NameConflict(spec.name.clone()));
        }
        state.next_id += 1;
        let id = format!("container-{}", state.next_id);
        state.created.insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.record(RuntimeCall::Start(id.to_string()));
        if self.fail_start {
            return Err(AgentError::Runtime(format!("start of {} failed", id)));
        }
        let mut state = self.state.lock().unwrap();
        let spec = state
            .created
            .remove(id)
            .ok_or_else(|| AgentError::Runtime(format!("no such container {}", id)))?;
        let ports = if spec.publish_all_ports {
            vec![PortBinding {
                private_port: DEFAULT_CONTROL_PORT,
                public_port: Some(32768 + state.next_id),
            }]
        } else {
            Vec::new()
        };
        state.running.push(ContainerRecord {
            id: id.to_string(),
            image: spec.image,
            names: vec![spec.name],
            labels: spec.labels,
            ports,
        });
        Ok(())
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.record(RuntimeCall::Stop(id.to_string()));
        if self.failing_stops.contains(id) {
            return Err(AgentError::Runtime(format!("stop of {} failed", id)));
        }
        self.state.lock().unwrap().running.retain(|c| c.id != id);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.record(RuntimeCall::Remove(id.to_string()));
        self.state.lock().unwrap().created.remove(id);
        Ok(())
    }
}

/// Store whose point reads serve `pairs` and whose blocking reads replay a
/// script, then block forever once it runs out.
#[derive(Default)]
pub struct MockStore {
    pairs: Mutex<Vec<KvPair>>,
    script: Mutex<VecDeque<Result<Listing>>>,
    waits: Mutex<Vec<(String, u64)>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pairs(self, pairs: Vec<KvPair>) -> Self {
        *self.pairs.lock().unwrap() = pairs;
        self
    }

    pub fn then(self, listing: Result<Listing>) -> Self {
        self.script.lock().unwrap().push_back(listing);
        self
    }

    /// `(prefix, index)` of every blocking read.
    pub fn waits(&self) -> Vec<(String, u64)> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigStore for MockStore {
    async fn list_since(&self, prefix: &str, index: u64) -> Result<Listing> {
        self.waits.lock().unwrap().push((prefix.to_string(), index));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(listing) => listing,
            None => std::future::pending().await,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        Ok(self
            .pairs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockControlPlane {
    deliveries: Mutex<Vec<(u16, String)>>,
    failing_ports: HashSet<u16>,
}

impl MockControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_port(mut self, port: u16) -> Self {
        self.failing_ports.insert(port);
        self
    }

    pub fn deliveries(&self) -> Vec<(u16, String)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn configure(&self, port: u16, config: String) -> Result<()> {
        if self.failing_ports.contains(&port) {
            return Err(AgentError::Rpc(tonic::Status::unavailable("manager down")));
        }
        self.deliveries.lock().unwrap().push((port, config));
        Ok(())
    }
}
