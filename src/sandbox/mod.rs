//! Container runtime for isolated tool sessions.
//!
//! [`ContainerRuntime`] is the collaborator the network layer consumes
//! for address discovery, and the session layer for lifecycle. The
//! production implementation talks to Docker.

mod docker;

pub use docker::DockerRuntime;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::SandboxConfig;

/// Container lifecycle and network-info operations.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates and starts a container with the given name.
    async fn launch(&self, name: &str, cfg: &SandboxConfig) -> Result<()>;

    /// Force-removes a container. Removing a gone container is fine.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Runs a command inside the container, returning captured stdout.
    async fn exec(&self, name: &str, cmd: Vec<String>) -> Result<String>;

    /// The container's current IPv4 address, or an error if none is
    /// assigned yet. Address assignment is asynchronous with start,
    /// so callers poll this.
    async fn container_ipv4(&self, name: &str) -> Result<String>;

    /// Best-effort gateway address of the configured container network.
    async fn gateway_ipv4(&self) -> Result<String>;
}
