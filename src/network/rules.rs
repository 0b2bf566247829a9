//! Firewall rule model and rule set builders.
//!
//! Builders are pure: given a network configuration and (for allowlist
//! mode) a resolved domain-to-IP map, they produce the ordered rule list
//! for one container. Priority is a total order: lower value = evaluated
//! first, so an explicit allow at priority 1 beats a range reject at 10
//! and the allowlist default-deny at 99.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::NetworkConfig;

/// RFC1918 private network ranges.
pub const RFC1918_RANGES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Cloud provider metadata endpoint range.
pub const METADATA_RANGE: &str = "169.254.0.0/16";

/// Reserved key for the auto-detected gateway in resolved-IP maps.
///
/// The gateway rides along in the resolution map so refresh diffing sees
/// it, but it gets its own priority-0 rule rather than a per-IP allow.
pub const GATEWAY_DOMAIN: &str = "__internal_gateway__";

const GATEWAY_PRIORITY: u32 = 0;
const ALLOW_PRIORITY: u32 = 1;
const BLOCK_PRIORITY: u32 = 10;
const DEFAULT_DENY_PRIORITY: u32 = 99;

/// What the packet filter should do with a matching packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Accept,
    Reject,
}

impl RuleAction {
    /// The iptables/firewalld jump target name.
    pub fn target(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.target())
    }
}

/// A single FORWARD-chain direct rule scoped to one container source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    /// Evaluation order: lower values match first.
    pub priority: u32,
    /// Source address (the container IP).
    pub source: String,
    /// Destination CIDR.
    pub destination: String,
    pub action: RuleAction,
}

impl FirewallRule {
    fn new(priority: u32, source: &str, destination: impl Into<String>, action: RuleAction) -> Self {
        Self {
            priority,
            source: source.to_string(),
            destination: destination.into(),
            action,
        }
    }
}

impl std::fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "priority={} -s {} -d {} -j {}",
            self.priority, self.source, self.destination, self.action
        )
    }
}

/// Builds the rule set for restricted mode.
///
/// Restricted mode blocks RFC1918 and metadata ranges but adds no
/// catch-all: unmatched destinations fall through to the host's default
/// FORWARD policy, so everything else stays reachable.
pub fn build_restricted_rules(
    cfg: &NetworkConfig,
    container_ip: &str,
    gateway_ip: Option<&str>,
) -> Vec<FirewallRule> {
    let mut rules = Vec::new();

    if let Some(gateway) = gateway_ip {
        rules.push(FirewallRule::new(
            GATEWAY_PRIORITY,
            container_ip,
            format!("{gateway}/32"),
            RuleAction::Accept,
        ));
    }

    if cfg.allow_local_network_access {
        for cidr in RFC1918_RANGES {
            rules.push(FirewallRule::new(
                ALLOW_PRIORITY,
                container_ip,
                cidr,
                RuleAction::Accept,
            ));
        }
    } else if cfg.block_private_networks {
        for cidr in RFC1918_RANGES {
            rules.push(FirewallRule::new(
                BLOCK_PRIORITY,
                container_ip,
                cidr,
                RuleAction::Reject,
            ));
        }
    }

    if cfg.block_metadata_endpoint {
        rules.push(FirewallRule::new(
            BLOCK_PRIORITY,
            container_ip,
            METADATA_RANGE,
            RuleAction::Reject,
        ));
    }

    rules
}

/// Builds the rule set for allowlist mode.
///
/// Every unique resolved IP gets an explicit /32 allow, followed by the
/// RFC1918/metadata rejects and a default-deny for everything else. An
/// allowed IP that falls inside a blocked range is still reachable
/// because its allow carries a strictly lower priority.
pub fn build_allowlist_rules(
    cfg: &NetworkConfig,
    container_ip: &str,
    gateway_ip: Option<&str>,
    domain_ips: &BTreeMap<String, Vec<String>>,
) -> Vec<FirewallRule> {
    let mut rules = Vec::new();

    if let Some(gateway) = gateway_ip {
        rules.push(FirewallRule::new(
            GATEWAY_PRIORITY,
            container_ip,
            format!("{gateway}/32"),
            RuleAction::Accept,
        ));
    }

    if cfg.allow_local_network_access {
        for cidr in RFC1918_RANGES {
            rules.push(FirewallRule::new(
                ALLOW_PRIORITY,
                container_ip,
                cidr,
                RuleAction::Accept,
            ));
        }
    }

    // Deduplicate across domains; BTreeSet gives the sorted, deterministic
    // iteration order the tests rely on.
    let unique_ips: BTreeSet<&str> = domain_ips
        .iter()
        .filter(|(domain, _)| domain.as_str() != GATEWAY_DOMAIN)
        .flat_map(|(_, ips)| ips.iter().map(String::as_str))
        .collect();

    for ip in unique_ips {
        rules.push(FirewallRule::new(
            ALLOW_PRIORITY,
            container_ip,
            format!("{ip}/32"),
            RuleAction::Accept,
        ));
    }

    if !cfg.allow_local_network_access {
        for cidr in RFC1918_RANGES {
            rules.push(FirewallRule::new(
                BLOCK_PRIORITY,
                container_ip,
                cidr,
                RuleAction::Reject,
            ));
        }
        rules.push(FirewallRule::new(
            BLOCK_PRIORITY,
            container_ip,
            METADATA_RANGE,
            RuleAction::Reject,
        ));
    }

    rules.push(FirewallRule::new(
        DEFAULT_DENY_PRIORITY,
        container_ip,
        "0.0.0.0/0",
        RuleAction::Reject,
    ));

    rules
}
