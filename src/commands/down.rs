//! Tear down a session container and its firewall rules by name.
//!
//! Used when a previous invocation died before its own cleanup ran.

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::warn;

use crate::config::Config;
use crate::network::{CacheStore, Firewalld, NetworkManager, SystemDns};
use crate::sandbox::{ContainerRuntime, DockerRuntime};

pub async fn run(container_name: String) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd)?;

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect(config.sandbox.docker_network.clone()).await?);

    let mut network = NetworkManager::new(
        config.network.clone(),
        Arc::clone(&runtime),
        Arc::new(Firewalld::new()),
        CacheStore::default_location(),
        Arc::new(SystemDns),
    );

    // Teardown never aborts cleanup; rule removal is best-effort.
    if let Err(e) = network.teardown(&container_name).await {
        warn!("Network teardown failed: {e:#}");
    }

    runtime.remove(&container_name).await?;

    println!("{} Removed {}", "✓".green(), container_name.bold());
    Ok(())
}
