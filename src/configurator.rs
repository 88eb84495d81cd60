//! Pushes each running service's slice of the config tree to its control
//! plane.
//!
//! The control port is whatever host port the engine published for the
//! service's internal control port.  Config is read fresh from the store on
//! every push.

use std::sync::Arc;

use log::{info, warn};

use crate::decoder;
use crate::error::Result;
use crate::lifecycle::ServiceManager;
use crate::rpc::ControlPlane;
use crate::store::{service_prefix, ConfigStore};
use crate::types::{Action, PassReport, Service, ServiceFailure, ServiceSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureOutcome {
    Delivered,
    /// No running container for the service.
    NotRunning,
    /// Running, but the control port is not published (yet).
    NoControlPort,
    /// The store holds no configuration for the service.
    NoConfig,
}

pub struct Configurator {
    manager: Arc<ServiceManager>,
    store: Arc<dyn ConfigStore>,
    control: Arc<dyn ControlPlane>,
    instance_id: String,
}

impl Configurator {
    pub fn new(
        manager: Arc<ServiceManager>,
        store: Arc<dyn ConfigStore>,
        control: Arc<dyn ControlPlane>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            store,
            control,
            instance_id: instance_id.into(),
        }
    }

    pub async fn configure_service(&self, service: &Service) -> Result<ConfigureOutcome> {
        let containers = self.manager.containers_for(service).await?;
        let control_port = self.manager.registry().control_port(service);

        let mut outcome = ConfigureOutcome::NotRunning;
        for container in &containers {
            let Some(port) = container.published_port(control_port) else {
                warn!(
                    "Service {} ({}) has no published control port {}, skipping",
                    service, container.id, control_port
                );
                outcome = ConfigureOutcome::NoControlPort;
                continue;
            };

            let pairs = self
                .store
                .list(&service_prefix(&self.instance_id, service.as_str()))
                .await?;
            let doc = decoder::decode(&pairs)?;
            let Some(config) = decoder::service_config(&doc, &self.instance_id, service)? else {
                warn!("No configuration stored for service {}, skipping", service);
                return Ok(ConfigureOutcome::NoConfig);
            };

            self.control
                .configure(port, serde_json::to_string(config)?)
                .await?;
            info!("Configured service {} on port {}", service, port);
            outcome = ConfigureOutcome::Delivered;
        }
        Ok(outcome)
    }

    /// Configures every service, collecting failures instead of stopping.
    pub async fn configure_services(&self, services: &ServiceSet, report: &mut PassReport) {
        for service in services {
            match self.configure_service(service).await {
                Ok(ConfigureOutcome::Delivered) => report.configured.push(service.clone()),
                Ok(_) => report.skipped.push(service.clone()),
                Err(e) => {
                    warn!("Failed to configure service {}: {}", service, e);
                    report.failures.push(ServiceFailure {
                        service: service.clone(),
                        action: Action::Configure,
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}
