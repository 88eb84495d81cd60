//! Delivery of configuration to a service manager's control plane.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tonic::transport::Endpoint;

use crate::error::{with_deadline, Result};

pub mod manager;

use manager::manager_client::ManagerClient;
use manager::ConfigureRequest;

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Sends a serialized config document to the service listening on
    /// `localhost:<port>`.
    async fn configure(&self, port: u16, config: String) -> Result<()>;
}

/// gRPC `manager.Manager/Configure` over a fresh channel per delivery.
pub struct GrpcControlPlane {
    timeout: Duration,
}

impl GrpcControlPlane {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ControlPlane for GrpcControlPlane {
    async fn configure(&self, port: u16, config: String) -> Result<()> {
        let endpoint = Endpoint::from_shared(format!("http://127.0.0.1:{}", port))?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);

        with_deadline("configure rpc", self.timeout, async {
            let channel = endpoint.connect().await?;
            let mut client = ManagerClient::new(channel);
            client.configure(ConfigureRequest { config }).await?;
            Ok(())
        })
        .await?;
        debug!("Configured control plane on port {}", port);
        Ok(())
    }
}
