//! Starting and stopping the container behind a service.
//!
//! A container belongs to service `S` iff it carries [`MANAGED_LABEL`] and
//! `SERVICE_LABEL=S`.  Each service gets one deterministic container name,
//! so the engine itself refuses a second instance.

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};

use crate::error::Result;
use crate::registry::ServiceRegistry;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerFilter, ContainerRecord, ContainerSpec, Service, ServiceSet};

pub const MANAGED_LABEL: &str = "com.opencopilot.managed";
pub const SERVICE_LABEL: &str = "com.opencopilot.service-manager";

pub fn container_name(service: &Service) -> String {
    format!("{}.{}", SERVICE_LABEL, service)
}

pub struct ServiceManager {
    runtime: Arc<dyn ContainerRuntime>,
    registry: ServiceRegistry,
    instance_id: String,
    config_dir: PathBuf,
    runtime_socket: PathBuf,
}

impl ServiceManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: ServiceRegistry,
        instance_id: impl Into<String>,
        config_dir: impl Into<PathBuf>,
        runtime_socket: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            registry,
            instance_id: instance_id.into(),
            config_dir: config_dir.into(),
            runtime_socket: runtime_socket.into(),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// The container a service runs as.  Unknown services are rejected.
    pub fn container_spec(&self, service: &Service) -> Result<ContainerSpec> {
        let spec = self.registry.resolve(service)?;
        let config_dir = self.config_dir.display().to_string();
        let socket = self.runtime_socket.display().to_string();

        let mut env = vec![
            format!("CONFIG_DIR={}", config_dir),
            format!("INSTANCE_ID={}", self.instance_id),
        ];
        env.extend(spec.env.iter().map(|(k, v)| format!("{}={}", k, v)));

        let mut binds = vec![
            format!("{}:{}", socket, socket),
            format!("{}:{}", config_dir, config_dir),
        ];
        binds.extend(spec.binds.iter().cloned());

        Ok(ContainerSpec {
            name: container_name(service),
            image: spec.image.clone(),
            labels: [
                (MANAGED_LABEL.to_string(), String::new()),
                (SERVICE_LABEL.to_string(), service.to_string()),
            ]
            .into_iter()
            .collect(),
            env,
            binds,
            // Service managers drive the host's engine themselves.
            privileged: true,
            // Frees the name so a re-added service can start again.
            auto_remove: true,
            // The control port is discovered from the published mapping.
            publish_all_ports: true,
        })
    }

    /// Pulls, creates and starts the container for `service`.
    pub async fn start(&self, service: &Service) -> Result<String> {
        let spec = self.container_spec(service)?;
        info!("Adding service {} ({})", service, spec.image);

        self.runtime.pull(&spec.image).await?;
        let id = self.runtime.create(&spec).await?;
        if let Err(e) = self.runtime.start(&id).await {
            warn!("Service {} created as {} but failed to start: {}", service, id, e);
            if let Err(remove_err) = self.runtime.remove(&id).await {
                warn!("Could not remove unstarted container {}: {}", id, remove_err);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Stops every container of `service`.  Returns how many were stopped;
    /// none running is not an error.
    pub async fn stop(&self, service: &Service) -> Result<usize> {
        info!("Stopping service {}", service);
        let containers = self.containers_for(service).await?;
        for container in &containers {
            self.runtime.stop(&container.id).await?;
        }
        Ok(containers.len())
    }

    /// Running containers of one service, matched by exact name.
    pub async fn containers_for(&self, service: &Service) -> Result<Vec<ContainerRecord>> {
        let name = container_name(service);
        let filter = ContainerFilter {
            labels: vec![MANAGED_LABEL.to_string()],
            name: Some(name.clone()),
        };
        let containers = self.runtime.list(&filter).await?;
        Ok(containers
            .into_iter()
            .filter(|c| c.labels.contains_key(MANAGED_LABEL) && c.has_name(&name))
            .collect())
    }

    /// Every running container carrying the managed label.
    pub async fn managed_containers(&self) -> Result<Vec<ContainerRecord>> {
        let filter = ContainerFilter {
            labels: vec![MANAGED_LABEL.to_string()],
            name: None,
        };
        let containers = self.runtime.list(&filter).await?;
        Ok(containers
            .into_iter()
            .filter(|c| c.labels.contains_key(MANAGED_LABEL))
            .collect())
    }

    /// The actual service set.
    pub async fn local_services(&self) -> Result<ServiceSet> {
        Ok(self
            .managed_containers()
            .await?
            .iter()
            .filter_map(service_of)
            .collect())
    }
}

pub fn service_of(container: &ContainerRecord) -> Option<Service> {
    container
        .labels
        .get(SERVICE_LABEL)
        .map(|name| Service::new(name.as_str()))
}
