use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const CONFIG_FILE: &str = "warden.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Tool configuration - selects the coding-agent CLI run inside the container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Which tool to use (default: "claude")
    #[serde(default = "default_tool")]
    pub name: String,

    /// Extra arguments appended to the tool invocation, shell-style
    #[serde(default)]
    pub extra_args: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: default_tool(),
            extra_args: String::new(),
        }
    }
}

fn default_tool() -> String {
    "claude".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container image to use
    #[serde(default = "default_image")]
    pub image: String,

    /// Docker network the containers attach to
    #[serde(default = "default_docker_network")]
    pub docker_network: String,

    /// Additional volume mounts
    #[serde(default)]
    pub mounts: Vec<Mount>,

    /// Resource limits
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            docker_network: default_docker_network(),
            mounts: Vec::new(),
            resources: ResourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub host: String,
    pub container: String,
    #[serde(default = "default_true")]
    pub readonly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "8g")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit (e.g., "4")
    #[serde(default = "default_cpus")]
    pub cpus: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
        }
    }
}

/// Network egress policy for a session. Loaded once, read-only thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network mode: open, restricted, or allowlist
    #[serde(default)]
    pub mode: NetworkMode,

    /// Block RFC1918 private ranges (restricted mode)
    #[serde(default = "default_true")]
    pub block_private_networks: bool,

    /// Block the cloud metadata endpoint range
    #[serde(default = "default_true")]
    pub block_metadata_endpoint: bool,

    /// Allow the container to reach RFC1918 ranges regardless of mode
    #[serde(default)]
    pub allow_local_network_access: bool,

    /// Domains (or literal IPv4 addresses) reachable in allowlist mode
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// How often the allowlist IPs are re-resolved; <= 0 disables refresh
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: i64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: NetworkMode::Open,
            block_private_networks: true,
            block_metadata_endpoint: true,
            allow_local_network_access: false,
            allowed_domains: Vec::new(),
            refresh_interval_minutes: default_refresh_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No restrictions
    #[default]
    Open,
    /// Block private/internal ranges, allow everything else
    Restricted,
    /// Allow only resolved IPs of listed domains, deny everything else
    Allowlist,
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Restricted => write!(f, "restricted"),
            Self::Allowlist => write!(f, "allowlist"),
        }
    }
}

impl std::str::FromStr for NetworkMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "restricted" => Ok(Self::Restricted),
            "allowlist" => Ok(Self::Allowlist),
            _ => anyhow::bail!(
                "Unknown network mode: '{s}'. Supported: open, restricted, allowlist"
            ),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "warden:latest".to_string()
}

fn default_docker_network() -> String {
    "bridge".to_string()
}

fn default_memory() -> String {
    "8g".to_string()
}

fn default_cpus() -> String {
    "4".to_string()
}

fn default_refresh_interval() -> i64 {
    5
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}
