//! One tool session: container lifecycle plus network policy.
//!
//! The session owns the ordering guarantees: network isolation is set
//! up after launch and torn down before the container is removed, and
//! teardown runs even when the tool invocation fails.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::network::{CacheStore, Firewalld, NetworkManager, SystemDns};
use crate::sandbox::{ContainerRuntime, DockerRuntime};
use crate::tool::Tool;

/// A running (or about to run) sandboxed tool session.
pub struct Session {
    config: Config,
    runtime: Arc<dyn ContainerRuntime>,
    network: NetworkManager,
    tool: Tool,
    container_name: String,
}

impl Session {
    /// Connects to the container runtime and prepares the session state.
    ///
    /// The container name is derived from the project directory, so
    /// repeated sessions in the same project reuse one identity and
    /// warm-start the persisted IP cache.
    pub async fn create(config: Config, tool: Tool, project_dir: &Path) -> Result<Self> {
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(
            DockerRuntime::connect(config.sandbox.docker_network.clone()).await?,
        );

        let network = NetworkManager::new(
            config.network.clone(),
            Arc::clone(&runtime),
            Arc::new(Firewalld::new()),
            CacheStore::default_location(),
            Arc::new(SystemDns),
        );

        let container_name = container_name_for(project_dir);

        Ok(Self {
            config,
            runtime,
            network,
            tool,
            container_name,
        })
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Runs the tool once inside a fresh container and returns its output.
    pub async fn run(&mut self, prompt_args: &[String]) -> Result<String> {
        info!(
            "Starting session {} (tool: {}, network: {})",
            self.container_name,
            self.tool.name,
            self.network.mode()
        );

        self.runtime
            .launch(&self.container_name, &self.config.sandbox)
            .await
            .context("Failed to launch container")?;

        let result = self.run_inner(prompt_args).await;

        self.cleanup().await;
        result
    }

    async fn run_inner(&mut self, prompt_args: &[String]) -> Result<String> {
        self.network
            .setup_for_container(&self.container_name)
            .await
            .context("Failed to set up network isolation")?;

        let mut extra = shell_words::split(&self.config.tool.extra_args)
            .context("Failed to parse tool.extra_args")?;
        extra.extend(prompt_args.iter().cloned());

        let cmd = self.tool.command(&extra);
        self.runtime.exec(&self.container_name, cmd).await
    }

    /// Best-effort teardown: firewall rules first, then the container.
    async fn cleanup(&mut self) {
        if let Err(e) = self.network.teardown(&self.container_name).await {
            warn!("Network teardown failed: {e:#}");
        }
        if let Err(e) = self.runtime.remove(&self.container_name).await {
            warn!("Failed to remove container {}: {e:#}", self.container_name);
        }
    }
}

/// Stable container name for a project directory.
///
/// Hashing the canonical path gives every project its own identity
/// while repeated runs in one project map to the same container name
/// and the same on-disk IP cache file.
fn container_name_for(project_dir: &Path) -> String {
    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("warden-{:08x}", hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_container_name_format() {
        let dir = tempdir().unwrap();
        let name = container_name_for(dir.path());
        assert!(name.starts_with("warden-"));
        assert_eq!(name.len(), "warden-".len() + 8);
    }

    #[test]
    fn test_container_name_is_stable_per_project() {
        let dir = tempdir().unwrap();
        assert_eq!(container_name_for(dir.path()), container_name_for(dir.path()));
    }

    #[test]
    fn test_container_names_differ_across_projects() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        assert_ne!(container_name_for(a.path()), container_name_for(b.path()));
    }
}
