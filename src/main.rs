//! Copilot agent entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

mod agent;
mod api;
mod config;
mod configurator;
mod decoder;
mod error;
mod lifecycle;
mod reconciler;
mod registry;
mod rpc;
mod runtime;
mod store;
mod types;
mod watch;

#[cfg(test)]
mod test_utils;

use agent::Agent;
use config::Config;
use lifecycle::ServiceManager;
use registry::ServiceRegistry;
use rpc::GrpcControlPlane;
use runtime::DockerRuntime;
use store::ConsulStore;
use watch::{watch_config_tree, Backoff};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting agent for instance {} (config dir {})",
        cfg.instance_id,
        cfg.config_dir.display()
    );

    // Long-lived clients shared by every pass
    let runtime =
        DockerRuntime::connect(&cfg.docker_socket, cfg.runtime_timeout(), cfg.pull_timeout())?;
    runtime.ping().await?;
    let store = ConsulStore::new(cfg.consul_addr.clone(), cfg.watch_wait(), cfg.store_timeout())?;
    let control = GrpcControlPlane::new(cfg.rpc_timeout());

    let manager = Arc::new(ServiceManager::new(
        Arc::new(runtime),
        ServiceRegistry::with_overrides(&cfg.services),
        cfg.instance_id.clone(),
        cfg.config_dir.clone(),
        cfg.docker_socket.clone(),
    ));
    let agent = Arc::new(Agent::new(
        cfg.instance_id.clone(),
        Arc::new(store),
        manager,
        Arc::new(control),
    ));

    // Watch loop
    let agent_for_watch = Arc::clone(&agent);
    let backoff = Backoff::new(cfg.retry_initial(), cfg.retry_max());
    let mut watch_handle =
        tokio::spawn(async move { watch_config_tree(&agent_for_watch, backoff).await });

    // Agent API
    let agent_for_api = Arc::clone(&agent);
    let api_bind = cfg.api_bind;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_bind, agent_for_api).await {
            error!("Agent API failed: {}", e);
        }
    });

    // Run until a signal arrives or the watch loop gives up
    let outcome = tokio::select! {
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            Ok(())
        }
        res = &mut watch_handle => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::anyhow!("Watch loop stopped: {}", e)),
            Err(e) => Err(anyhow::anyhow!("Watch loop panicked: {}", e)),
        },
    };

    // Abort tasks
    watch_handle.abort();
    api_handle.abort();

    info!("Shutdown complete.");
    outcome
}
