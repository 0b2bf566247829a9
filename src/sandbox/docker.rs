//! Docker-backed container runtime.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, RemoveContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::network::InspectNetworkOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::config::SandboxConfig;

use super::ContainerRuntime;

/// Runs tool sessions inside Docker containers.
pub struct DockerRuntime {
    docker: Docker,
    /// Network whose gateway is allowed through in restricted/allowlist mode.
    network: String,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon and verifies it responds.
    pub async fn connect(network: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;

        docker
            .ping()
            .await
            .context("Cannot ping Docker daemon. Is Docker running?")?;

        Ok(Self {
            docker,
            network: network.into(),
        })
    }

    fn build_container_config(cfg: &SandboxConfig) -> Result<ContainerConfig<String>> {
        let mut binds = Vec::new();
        for mount in &cfg.mounts {
            let host_path = expand_path(&mount.host)?;
            let mode = if mount.readonly { "ro" } else { "rw" };
            binds.push(format!("{}:{}:{}", host_path, mount.container, mode));
        }

        let memory = parse_memory_limit(&cfg.resources.memory)?;
        let cpus = cfg.resources.cpus.parse::<f64>().unwrap_or(4.0);

        Ok(ContainerConfig {
            image: Some(cfg.image.clone()),
            working_dir: Some("/workspace".to_string()),
            // Keep PID 1 alive so the session can exec the tool later.
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            host_config: Some(bollard::service::HostConfig {
                binds: Some(binds),
                memory: Some(memory),
                nano_cpus: Some((cpus * 1_000_000_000.0) as i64),
                network_mode: Some(cfg.docker_network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn launch(&self, name: &str, cfg: &SandboxConfig) -> Result<()> {
        let container_config = Self::build_container_config(cfg)?;

        debug!("Creating container: {name}");
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .context("Failed to create container")?;

        debug!("Starting container: {name}");
        self.docker
            .start_container::<String>(name, None)
            .await
            .context("Failed to start container")?;

        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        debug!("Removing container: {name}");
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .context("Failed to remove container")?;
        Ok(())
    }

    async fn exec(&self, name: &str, cmd: Vec<String>) -> Result<String> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some("/workspace".to_string()),
                    ..Default::default()
                },
            )
            .await
            .context("Failed to create exec")?;

        let mut output = String::new();

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .context("Failed to start exec")?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        debug!("stderr: {}", String::from_utf8_lossy(&message));
                    }
                    Err(e) => {
                        warn!("Error reading exec output: {e}");
                    }
                    _ => {}
                }
            }
        }

        Ok(output)
    }

    async fn container_ipv4(&self, name: &str) -> Result<String> {
        let inspect = self
            .docker
            .inspect_container(name, None)
            .await
            .context("Failed to inspect container")?;

        let networks = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default();

        for endpoint in networks.values() {
            if let Some(ip) = &endpoint.ip_address {
                if !ip.is_empty() {
                    return Ok(ip.clone());
                }
            }
        }

        anyhow::bail!("no IPv4 address found for container {name}")
    }

    async fn gateway_ipv4(&self) -> Result<String> {
        let network = self
            .docker
            .inspect_network(&self.network, None::<InspectNetworkOptions<String>>)
            .await
            .with_context(|| format!("Failed to inspect network {}", self.network))?;

        let configs = network
            .ipam
            .and_then(|ipam| ipam.config)
            .unwrap_or_default();

        for config in configs {
            if let Some(gateway) = config.gateway {
                if gateway.parse::<std::net::Ipv4Addr>().is_ok() {
                    return Ok(gateway);
                }
            }
        }

        anyhow::bail!("could not find an IPv4 gateway on network {}", self.network)
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(rest).display().to_string())
    } else {
        Ok(path.to_string())
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.to_lowercase();

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().context("Invalid memory limit")?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().context("Invalid memory limit")?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().context("Invalid memory limit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mount;

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("8g").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_memory_limit("lots").is_err());
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/usr/bin").unwrap(), "/usr/bin");

        if dirs::home_dir().is_some() {
            let expanded = expand_path("~/.ssh").unwrap();
            assert!(!expanded.starts_with('~'));
            assert!(expanded.ends_with("/.ssh"));
        }
    }

    #[test]
    fn test_build_container_config_mounts() {
        let cfg = SandboxConfig {
            mounts: vec![Mount {
                host: "/src/project".to_string(),
                container: "/workspace".to_string(),
                readonly: false,
            }],
            ..SandboxConfig::default()
        };

        let container = DockerRuntime::build_container_config(&cfg).unwrap();
        let host_config = container.host_config.unwrap();
        let binds = host_config.binds.unwrap();

        assert_eq!(binds, vec!["/src/project:/workspace:rw".to_string()]);
        assert_eq!(host_config.network_mode.as_deref(), Some("bridge"));
    }

    #[test]
    fn test_build_container_config_resources() {
        let cfg = SandboxConfig::default();
        let container = DockerRuntime::build_container_config(&cfg).unwrap();
        let host_config = container.host_config.unwrap();

        assert_eq!(host_config.memory, Some(8 * 1024 * 1024 * 1024));
        assert_eq!(host_config.nano_cpus, Some(4_000_000_000));
    }
}
