use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ContainerFilter, ContainerRecord, ContainerSpec};

pub mod docker;
pub use docker::DockerRuntime;

/// The narrow slice of a container engine the agent relies on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Running containers matching `filter`.
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerRecord>>;

    /// Pulls `image`, waiting for the pull to finish.
    async fn pull(&self, image: &str) -> Result<()>;

    /// Creates a container and returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn stop(&self, id: &str) -> Result<()>;

    /// Force-removes a container that was created but never came up.
    async fn remove(&self, id: &str) -> Result<()>;
}
