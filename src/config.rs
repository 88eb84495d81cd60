use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::ServiceSpec;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub instance_id: String,
    pub config_dir: PathBuf,
    pub consul_addr: String,
    pub api_bind: SocketAddr,
    /// Engine socket the agent connects to; also bind-mounted into services.
    pub docker_socket: PathBuf,
    pub watch_wait_secs: u64,
    pub store_timeout_secs: u64,
    pub runtime_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    pub rpc_timeout_secs: u64,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// Registry entries added to or replacing the built-in services.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            config_dir: PathBuf::new(),
            consul_addr: "http://127.0.0.1:8500".into(),
            api_bind: SocketAddr::from(([0, 0, 0, 0], 50051)),
            docker_socket: "/var/run/docker.sock".into(),
            watch_wait_secs: 300,
            store_timeout_secs: 10,
            runtime_timeout_secs: 30,
            pull_timeout_secs: 600,
            rpc_timeout_secs: 10,
            retry_initial_ms: 500,
            retry_max_ms: 30_000,
            services: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("agent.toml"))
            .merge(Json::file("agent.json"))
            .merge(Env::prefixed("AGENT_"))
            // Same variables the agent hands to the services it spawns.
            .merge(Env::raw().only(&["INSTANCE_ID", "CONFIG_DIR"]))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.instance_id.trim().is_empty() {
            anyhow::bail!("No instance ID specified");
        }
        if self.config_dir.as_os_str().is_empty() {
            anyhow::bail!("No config directory specified");
        }
        Ok(())
    }

    pub fn watch_wait(&self) -> Duration {
        Duration::from_secs(self.watch_wait_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn runtime_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}
