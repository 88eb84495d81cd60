//! The configuration handler shared by the watch loop and the API.
//!
//! A pass decodes the instance tree, reconciles containers against it, then
//! pushes configuration to every service left running.  Passes are
//! serialized by `pass_lock`; the `reconciling` flag only reports that one
//! is underway.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::configurator::Configurator;
use crate::decoder;
use crate::error::Result;
use crate::lifecycle::{service_of, ServiceManager};
use crate::reconciler;
use crate::rpc::ControlPlane;
use crate::store::{services_prefix, ConfigStore, KvPair};
use crate::types::{AgentStatus, PassReport, ServiceStatus};

pub struct Agent {
    instance_id: String,
    store: Arc<dyn ConfigStore>,
    manager: Arc<ServiceManager>,
    configurator: Configurator,
    pass_lock: Mutex<()>,
    reconciling: AtomicBool,
    watch_index: AtomicU64,
}

/// Holds the reconciling flag up for as long as it lives.
struct ReconcilingFlag<'a>(&'a AtomicBool);

impl<'a> ReconcilingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ReconcilingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Agent {
    pub fn new(
        instance_id: impl Into<String>,
        store: Arc<dyn ConfigStore>,
        manager: Arc<ServiceManager>,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        let instance_id = instance_id.into();
        let configurator =
            Configurator::new(manager.clone(), store.clone(), control, instance_id.clone());
        Self {
            instance_id,
            store,
            manager,
            configurator,
            pass_lock: Mutex::new(()),
            reconciling: AtomicBool::new(false),
            watch_index: AtomicU64::new(0),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn store(&self) -> &dyn ConfigStore {
        self.store.as_ref()
    }

    pub fn is_reconciling(&self) -> bool {
        self.reconciling.load(Ordering::SeqCst)
    }

    pub fn watch_index(&self) -> u64 {
        self.watch_index.load(Ordering::SeqCst)
    }

    pub(crate) fn set_watch_index(&self, index: u64) {
        self.watch_index.store(index, Ordering::SeqCst);
    }

    /// Runs one pass against the given listing of the instance subtree.
    pub async fn handle_config(&self, pairs: &[KvPair]) -> Result<PassReport> {
        let _pass = self.pass_lock.lock().await;
        let _flag = ReconcilingFlag::raise(&self.reconciling);

        let doc = decoder::decode(pairs)?;
        let desired = decoder::desired_services(&doc, &self.instance_id)?;
        debug!("Desired services: {:?}", desired);

        let mut report = PassReport::default();
        reconciler::reconcile(&self.manager, &desired, &mut report).await?;

        let local = self.manager.local_services().await?;
        self.configurator.configure_services(&local, &mut report).await;

        info!(
            "Pass complete: {} started, {} stopped, {} configured, {} skipped, {} failed",
            report.started.len(),
            report.stopped.len(),
            report.configured.len(),
            report.skipped.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Externally triggered pass over a fresh read of the instance subtree.
    pub async fn reconfigure(&self) -> Result<PassReport> {
        let pairs = self.store.list(&services_prefix(&self.instance_id)).await?;
        self.handle_config(&pairs).await
    }

    pub async fn status(&self) -> Result<AgentStatus> {
        let services = self
            .manager
            .managed_containers()
            .await?
            .into_iter()
            .map(|c| ServiceStatus {
                service: service_of(&c),
                id: c.id,
                image: c.image,
            })
            .collect();
        Ok(AgentStatus {
            instance_id: self.instance_id.clone(),
            reconciling: self.is_reconciling(),
            watch_index: self.watch_index(),
            services,
        })
    }
}
