//! Domain-specific error types for network isolation.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings. Errors that must abort
//! setup (an under-restricted firewall) are distinct from the ones
//! teardown and background refresh swallow with a warning.

/// Errors that can occur while managing container network isolation.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// firewalld is not installed, not running, or not reachable.
    #[error("firewalld is not available: {message}\n\nTo fix this, either:\n  1. Install and start firewalld:\n     sudo apt install firewalld && sudo systemctl enable --now firewalld\n  2. Run with unrestricted network access: warden run --network=open")]
    BackendUnavailable { message: String },

    /// Allowlist mode was selected without any allowed domains.
    #[error("allowlist mode requires at least one allowed domain")]
    EmptyAllowlist,

    /// The container never received an IPv4 address within the wait budget.
    #[error("timed out waiting for an IPv4 address on container {container}")]
    AddressTimeout { container: String },

    /// An IPv6 literal was supplied where only IPv4 is supported.
    #[error("IPv6 addresses are not supported: {address}")]
    UnsupportedAddressFamily { address: String },

    /// A single domain failed to resolve to any IPv4 address.
    #[error("failed to resolve {domain}: {message}")]
    ResolutionFailed { domain: String, message: String },

    /// Every allowed domain failed to resolve.
    #[error("failed to resolve any allowed domain")]
    AllDomainsFailed,

    /// The backend rejected a rule during installation.
    #[error("failed to install firewall rule [{rule}]: {message}")]
    RuleInstall { rule: String, message: String },

    /// A firewall-cmd invocation failed outright.
    #[error("firewall-cmd failed: {message}")]
    CommandFailed { message: String },
}

impl NetworkError {
    /// Returns true if this error means firewalld cannot be used at all.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Returns true if this is an address discovery timeout.
    pub fn is_address_timeout(&self) -> bool {
        matches!(self, Self::AddressTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_mentions_remediation() {
        let err = NetworkError::BackendUnavailable {
            message: "firewalld is not running".to_string(),
        };
        assert!(err.is_backend_unavailable());
        let text = err.to_string();
        assert!(text.contains("firewalld"));
        assert!(text.contains("--network=open"));
    }

    #[test]
    fn test_address_timeout_names_container() {
        let err = NetworkError::AddressTimeout {
            container: "warden-abc123".to_string(),
        };
        assert!(err.is_address_timeout());
        assert!(err.to_string().contains("warden-abc123"));
    }

    #[test]
    fn test_rule_install_includes_rule() {
        let err = NetworkError::RuleInstall {
            rule: "priority=99 -d 0.0.0.0/0 REJECT".to_string(),
            message: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0/0"));
        assert!(err.to_string().contains("permission denied"));
    }
}
