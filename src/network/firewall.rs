//! Firewalld-backed rule installation and removal.
//!
//! [`RuleTable`] is the seam to the live packet filter: the production
//! implementation shells out to `firewall-cmd --direct` against the
//! ipv4 FORWARD chain, while tests substitute a recording fake. The
//! [`FirewallBackend`] bound to one container's addresses turns the
//! pure rule builders into installed state.

use std::collections::BTreeMap;
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;

use super::error::NetworkError;
use super::rules::{build_allowlist_rules, build_restricted_rules, FirewallRule};

/// Access to the live direct-rule table for the ipv4 FORWARD chain.
#[async_trait]
pub trait RuleTable: Send + Sync {
    /// Installs one rule. Installing an already-present rule is success.
    async fn add(&self, rule: &FirewallRule) -> Result<(), NetworkError>;

    /// Lists all installed direct rules in firewalld's raw line format.
    async fn list(&self) -> Result<Vec<String>, NetworkError>;

    /// Removes one rule given its raw line as returned by [`Self::list`].
    async fn remove(&self, raw_rule: &str) -> Result<(), NetworkError>;

    /// Verifies the control plane is installed, running, and reachable.
    async fn check_available(&self) -> Result<(), NetworkError>;
}

/// Production table driven by `firewall-cmd`.
#[derive(Debug, Default, Clone)]
pub struct Firewalld;

impl Firewalld {
    pub fn new() -> Self {
        Self
    }

    async fn run(args: &[&str]) -> Result<Output, NetworkError> {
        Command::new("firewall-cmd")
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    NetworkError::BackendUnavailable {
                        message: "firewalld not installed (firewall-cmd not found)".to_string(),
                    }
                } else {
                    NetworkError::CommandFailed {
                        message: e.to_string(),
                    }
                }
            })
    }

    fn combined_text(output: &Output) -> String {
        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

#[async_trait]
impl RuleTable for Firewalld {
    async fn add(&self, rule: &FirewallRule) -> Result<(), NetworkError> {
        let priority = rule.priority.to_string();
        let args = [
            "--direct",
            "--add-rule",
            "ipv4",
            "filter",
            "FORWARD",
            &priority,
            "-s",
            &rule.source,
            "-d",
            &rule.destination,
            "-j",
            rule.action.target(),
        ];

        let output = Self::run(&args).await?;
        let text = Self::combined_text(&output);

        // Re-adding an existing rule reports ALREADY_ENABLED; that happens
        // on setup retries and must be treated as success.
        if output.status.success() || text.contains("ALREADY_ENABLED") {
            debug!("Installed rule: {rule}");
            return Ok(());
        }

        Err(NetworkError::CommandFailed { message: text })
    }

    async fn list(&self) -> Result<Vec<String>, NetworkError> {
        let output = match Self::run(&["--direct", "--get-all-rules"]).await {
            Ok(output) => output,
            // firewalld gone mid-session: nothing listable, nothing to remove.
            Err(e) => {
                debug!("Could not list direct rules: {e}");
                return Ok(Vec::new());
            }
        };

        if !output.status.success() {
            return Ok(Vec::new());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    async fn remove(&self, raw_rule: &str) -> Result<(), NetworkError> {
        // Raw format: "ipv4 filter FORWARD <priority> -s <src> -d <dst> -j <action>"
        let fields: Vec<&str> = raw_rule.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(NetworkError::CommandFailed {
                message: format!("invalid rule format: {raw_rule}"),
            });
        }

        let mut args = vec!["--direct", "--remove-rule"];
        args.extend(fields);

        let output = Self::run(&args).await?;
        if !output.status.success() {
            return Err(NetworkError::CommandFailed {
                message: Self::combined_text(&output),
            });
        }
        Ok(())
    }

    async fn check_available(&self) -> Result<(), NetworkError> {
        let output = Self::run(&["--state"]).await.map_err(|e| match e {
            NetworkError::BackendUnavailable { .. } => e,
            other => NetworkError::BackendUnavailable {
                message: other.to_string(),
            },
        })?;

        let state = Self::combined_text(&output);
        if !output.status.success() || state != "running" {
            return Err(NetworkError::BackendUnavailable {
                message: format!("firewalld is not running (state: {state})"),
            });
        }
        Ok(())
    }
}

/// Applies and removes rule sets for one bound (container IP, gateway IP) pair.
#[derive(Clone)]
pub struct FirewallBackend {
    table: Arc<dyn RuleTable>,
    container_ip: String,
    gateway_ip: Option<String>,
}

impl FirewallBackend {
    pub fn new(table: Arc<dyn RuleTable>, container_ip: String, gateway_ip: Option<String>) -> Self {
        Self {
            table,
            container_ip,
            gateway_ip,
        }
    }

    /// Builds and installs the restricted-mode rule set.
    pub async fn apply_restricted(&self, cfg: &NetworkConfig) -> Result<(), NetworkError> {
        info!(
            "Applying restricted mode firewall rules for container IP {}",
            self.container_ip
        );
        let rules = build_restricted_rules(cfg, &self.container_ip, self.gateway_ip.as_deref());
        self.install(&rules).await
    }

    /// Builds and installs the allowlist-mode rule set.
    pub async fn apply_allowlist(
        &self,
        cfg: &NetworkConfig,
        domain_ips: &BTreeMap<String, Vec<String>>,
    ) -> Result<(), NetworkError> {
        info!(
            "Applying allowlist mode firewall rules for container IP {}",
            self.container_ip
        );
        let rules = build_allowlist_rules(
            cfg,
            &self.container_ip,
            self.gateway_ip.as_deref(),
            domain_ips,
        );
        self.install(&rules).await
    }

    /// Removes every installed rule whose source matches this container.
    ///
    /// Best-effort: a single failed removal is logged and the rest are
    /// still attempted, so teardown never wedges on stale state.
    pub async fn remove_rules(&self) -> Result<(), NetworkError> {
        info!("Removing firewall rules for container IP {}", self.container_ip);

        let rules = self.table.list().await?;
        let mut removed = 0;
        for raw in rules.iter().filter(|raw| self.matches_source(raw)) {
            match self.table.remove(raw).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove rule [{raw}]: {e}"),
            }
        }

        info!("Removed {removed} firewall rules for {}", self.container_ip);
        Ok(())
    }

    fn matches_source(&self, raw_rule: &str) -> bool {
        let fields: Vec<&str> = raw_rule.split_whitespace().collect();
        fields.windows(2).any(|pair| {
            pair[0] == "-s"
                && (pair[1] == self.container_ip
                    || pair[1] == format!("{}/32", self.container_ip))
        })
    }

    // Builders emit ascending priority; install in that order so the live
    // table is never momentarily missing an earlier-priority reject.
    async fn install(&self, rules: &[FirewallRule]) -> Result<(), NetworkError> {
        for rule in rules {
            self.table
                .add(rule)
                .await
                .map_err(|e| NetworkError::RuleInstall {
                    rule: rule.to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}
