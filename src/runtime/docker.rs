use super::ContainerRuntime;
use crate::error::{with_deadline, AgentError, Result};
use crate::types::{ContainerFilter, ContainerRecord, ContainerSpec, PortBinding};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HostConfig};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::stream::StreamExt;
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub struct DockerRuntime {
    docker: Docker,
    timeout: Duration,
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connects to the engine listening on `socket`.  The client is shared
    /// for the agent's lifetime.
    pub fn connect(socket: &Path, timeout: Duration, pull_timeout: Duration) -> Result<Self> {
        let docker = Docker::connect_with_unix(
            &socket.to_string_lossy(),
            pull_timeout.as_secs(),
            API_DEFAULT_VERSION,
        )?;
        Ok(Self {
            docker,
            timeout,
            pull_timeout,
        })
    }

    pub async fn ping(&self) -> Result<()> {
        with_deadline("docker ping", self.timeout, async {
            self.docker.ping().await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(&self, filter: &ContainerFilter) -> Result<Vec<ContainerRecord>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if !filter.labels.is_empty() {
            filters.insert("label".to_string(), filter.labels.clone());
        }
        if let Some(name) = &filter.name {
            filters.insert("name".to_string(), vec![name.clone()]);
        }
        let opts = ListContainersOptions::<String> {
            all: false,
            filters,
            ..Default::default()
        };

        let containers = with_deadline("list containers", self.timeout, async {
            Ok(self.docker.list_containers(Some(opts)).await?)
        })
        .await?;
        Ok(containers.into_iter().filter_map(to_record).collect())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let (from_image, tag) = split_image(image);
        info!("Pulling {}", image);
        let opts = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        with_deadline("image pull", self.pull_timeout, async {
            let mut stream = Box::pin(self.docker.create_image(Some(opts), None, None));
            while let Some(progress) = stream.next().await {
                let progress = progress?;
                if let Some(status) = progress.status {
                    debug!("{}: {}", image, status);
                }
            }
            Ok(())
        })
        .await
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image.clone()),
            labels: Some(spec.labels.clone().into_iter().collect()),
            env: Some(spec.env.clone()),
            host_config: Some(HostConfig {
                auto_remove: Some(spec.auto_remove),
                privileged: Some(spec.privileged),
                binds: Some(spec.binds.clone()),
                publish_all_ports: Some(spec.publish_all_ports),
                ..Default::default()
            }),
            ..Default::default()
        };
        let opts = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let created = with_deadline("create container", self.timeout, async {
            match self.docker.create_container(Some(opts), config).await {
                Ok(response) => Ok(response.id),
                Err(DockerError::DockerResponseServerError {
                    status_code: 409, ..
                }) => Err(AgentError::NameConflict(spec.name.clone())),
                Err(e) => Err(e.into()),
            }
        })
        .await?;
        debug!("Created container {} as {}", spec.name, created);
        Ok(created)
    }

    async fn start(&self, id: &str) -> Result<()> {
        with_deadline("start container", self.timeout, async {
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>)
                .await?;
            Ok(())
        })
        .await
    }

    async fn stop(&self, id: &str) -> Result<()> {
        with_deadline("stop container", self.timeout, async {
            match self.docker.stop_container(id, None::<StopContainerOptions>).await {
                Ok(()) => Ok(()),
                // Already stopped, or auto-removed since it was listed.
                Err(DockerError::DockerResponseServerError {
                    status_code: 304 | 404,
                    ..
                }) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        with_deadline("remove container", self.timeout, async {
            match self.docker.remove_container(id, Some(opts)).await {
                Ok(()) => Ok(()),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}

/// Splits an image reference into repository and tag, defaulting to
/// `latest`.  Digest references are passed through untouched.
fn split_image(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(colon) => {
            let at = name_start + colon;
            (&image[..at], &image[at + 1..])
        }
        None => (image, "latest"),
    }
}

fn to_record(summary: ContainerSummary) -> Option<ContainerRecord> {
    let id = summary.id?;
    let names = summary
        .names
        .unwrap_or_default()
        .into_iter()
        .map(|n| n.trim_start_matches('/').to_string())
        .collect();
    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| PortBinding {
            private_port: p.private_port,
            public_port: p.public_port,
        })
        .collect();
    Some(ContainerRecord {
        id,
        image: summary.image.unwrap_or_default(),
        names,
        labels: summary.labels.unwrap_or_default().into_iter().collect(),
        ports,
    })
}
