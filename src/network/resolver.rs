//! Domain resolution and the in-memory IP cache.
//!
//! The resolver turns the configured allowlist (hostnames or literal
//! IPv4 addresses) into IP sets and owns the session's cache of the
//! most recent successful resolution. Change detection against that
//! cache is what lets the background refresher skip firewall churn
//! when DNS answers haven't moved.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::NetworkError;

/// Snapshot of domain-to-IP resolutions, persisted per container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpCache {
    #[serde(default)]
    pub domains: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub last_update: DateTime<Utc>,
}

/// Seam for forward DNS lookups so tests can substitute canned answers.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// Resolves a hostname to its IPv4 addresses (A records).
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<String>, NetworkError>;
}

/// Production lookup backed by the system resolver.
#[derive(Debug, Default, Clone)]
pub struct SystemDns;

#[async_trait]
impl DnsLookup for SystemDns {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<String>, NetworkError> {
        let addrs = tokio::net::lookup_host((host, 443))
            .await
            .map_err(|e| NetworkError::ResolutionFailed {
                domain: host.to_string(),
                message: e.to_string(),
            })?;

        let mut ips: Vec<String> = addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4.to_string()),
                IpAddr::V6(_) => None,
            })
            .collect();
        ips.sort();
        ips.dedup();
        Ok(ips)
    }
}

/// Resolves allowed domains and tracks the session's IP cache.
pub struct Resolver {
    cache: IpCache,
    dns: Arc<dyn DnsLookup>,
}

impl Resolver {
    pub fn new(cache: IpCache, dns: Arc<dyn DnsLookup>) -> Self {
        Self { cache, dns }
    }

    /// Resolves a single allowlist entry to IPv4 addresses.
    ///
    /// Literal IPv4 addresses pass through unchanged; literal IPv6
    /// addresses are rejected since the rule tables are IPv4-only.
    pub async fn resolve_domain(&self, input: &str) -> Result<Vec<String>, NetworkError> {
        if let Ok(addr) = input.parse::<IpAddr>() {
            return match addr {
                IpAddr::V4(v4) => Ok(vec![v4.to_string()]),
                IpAddr::V6(_) => Err(NetworkError::UnsupportedAddressFamily {
                    address: input.to_string(),
                }),
            };
        }

        let ips = self.dns.lookup_ipv4(input).await?;
        if ips.is_empty() {
            return Err(NetworkError::ResolutionFailed {
                domain: input.to_string(),
                message: "no IPv4 addresses returned".to_string(),
            });
        }
        Ok(ips)
    }

    /// Resolves every domain independently; individual failures are
    /// logged and skipped. Callers treat an empty result as fatal.
    pub async fn resolve_all(&self, domains: &[String]) -> BTreeMap<String, Vec<String>> {
        let mut resolved = BTreeMap::new();
        for domain in domains {
            match self.resolve_domain(domain).await {
                Ok(ips) => {
                    resolved.insert(domain.clone(), ips);
                }
                Err(e) => warn!("Failed to resolve {domain}: {e}"),
            }
        }
        resolved
    }

    /// Merges newly resolved mappings into the cache and bumps the timestamp.
    pub fn update_cache(&mut self, new_results: BTreeMap<String, Vec<String>>) {
        for (domain, ips) in new_results {
            self.cache.domains.insert(domain, ips);
        }
        self.cache.last_update = Utc::now();
    }

    /// Order-insensitive comparison of a candidate resolution against the
    /// cached mapping. True iff every domain maps to the same IP set.
    pub fn ips_unchanged(&self, candidate: &BTreeMap<String, Vec<String>>) -> bool {
        if candidate.len() != self.cache.domains.len() {
            return false;
        }
        candidate.iter().all(|(domain, ips)| {
            self.cache.domains.get(domain).is_some_and(|cached| {
                let new_set: BTreeSet<&String> = ips.iter().collect();
                let cached_set: BTreeSet<&String> = cached.iter().collect();
                new_set == cached_set
            })
        })
    }

    pub fn cache(&self) -> &IpCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// DNS stub returning fixed answers per host.
    struct FakeDns {
        answers: BTreeMap<String, Vec<String>>,
    }

    #[async_trait]
    impl DnsLookup for FakeDns {
        async fn lookup_ipv4(&self, host: &str) -> Result<Vec<String>, NetworkError> {
            self.answers
                .get(host)
                .cloned()
                .ok_or_else(|| NetworkError::ResolutionFailed {
                    domain: host.to_string(),
                    message: "NXDOMAIN".to_string(),
                })
        }
    }

    fn resolver_with(answers: &[(&str, &[&str])]) -> Resolver {
        let answers = answers
            .iter()
            .map(|(h, ips)| {
                (
                    h.to_string(),
                    ips.iter().map(|ip| ip.to_string()).collect(),
                )
            })
            .collect();
        Resolver::new(IpCache::default(), Arc::new(FakeDns { answers }))
    }

    fn map(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(d, ips)| {
                (
                    d.to_string(),
                    ips.iter().map(|ip| ip.to_string()).collect(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_resolve_domain_literal_ipv4() {
        let resolver = resolver_with(&[]);
        let ips = resolver.resolve_domain("8.8.8.8").await.unwrap();
        assert_eq!(ips, vec!["8.8.8.8".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_domain_literal_ipv6_fails() {
        let resolver = resolver_with(&[]);
        let err = resolver
            .resolve_domain("2001:4860:4860::8888")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetworkError::UnsupportedAddressFamily { .. }
        ));
    }

    #[tokio::test]
    async fn test_resolve_domain_via_dns() {
        let resolver = resolver_with(&[("api.example.com", &["1.2.3.4", "5.6.7.8"])]);
        let ips = resolver.resolve_domain("api.example.com").await.unwrap();
        assert_eq!(ips.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_domain_empty_answer_is_error() {
        let resolver = resolver_with(&[("empty.example.com", &[])]);
        let err = resolver
            .resolve_domain("empty.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::ResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_resolve_all_tolerates_partial_failure() {
        let resolver = resolver_with(&[("good.example.com", &["1.2.3.4"])]);
        let resolved = resolver
            .resolve_all(&[
                "good.example.com".to_string(),
                "missing.example.com".to_string(),
            ])
            .await;

        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("good.example.com"));
    }

    #[tokio::test]
    async fn test_resolve_all_total_failure_is_empty() {
        let resolver = resolver_with(&[]);
        let resolved = resolver
            .resolve_all(&["missing.example.com".to_string()])
            .await;
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_ips_unchanged_reflexive() {
        let mut resolver = resolver_with(&[]);
        let snapshot = map(&[("api.example.com", &["1.2.3.4", "5.6.7.8"])]);
        resolver.update_cache(snapshot.clone());
        assert!(resolver.ips_unchanged(&snapshot));
    }

    #[test]
    fn test_ips_unchanged_ignores_ordering() {
        let mut resolver = resolver_with(&[]);
        resolver.update_cache(map(&[("api.example.com", &["1.2.3.4", "5.6.7.8"])]));

        let permuted = map(&[("api.example.com", &["5.6.7.8", "1.2.3.4"])]);
        assert!(resolver.ips_unchanged(&permuted));
    }

    #[test]
    fn test_ips_unchanged_detects_added_ip() {
        let mut resolver = resolver_with(&[]);
        resolver.update_cache(map(&[("api.example.com", &["1.2.3.4"])]));

        let grown = map(&[("api.example.com", &["1.2.3.4", "9.9.9.9"])]);
        assert!(!resolver.ips_unchanged(&grown));
    }

    #[test]
    fn test_ips_unchanged_detects_new_domain() {
        let mut resolver = resolver_with(&[]);
        resolver.update_cache(map(&[("api.example.com", &["1.2.3.4"])]));

        let extra = map(&[
            ("api.example.com", &["1.2.3.4"]),
            ("cdn.example.com", &["10.20.30.40"]),
        ]);
        assert!(!resolver.ips_unchanged(&extra));
    }

    #[test]
    fn test_update_cache_merges_and_bumps_timestamp() {
        let mut resolver = resolver_with(&[]);
        let before = resolver.cache().last_update;

        resolver.update_cache(map(&[("api.example.com", &["1.2.3.4"])]));
        resolver.update_cache(map(&[("cdn.example.com", &["10.20.30.40"])]));

        assert_eq!(resolver.cache().domains.len(), 2);
        assert!(resolver.cache().last_update > before);
    }
}
