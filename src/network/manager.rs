//! High-level network isolation management for one container session.
//!
//! The manager selects the rule-building path for the configured mode,
//! waits out DHCP address assignment, wires the resolver, cache store
//! and firewall backend together, and owns the background refresh task
//! that keeps allowlist rules synchronized with changing DNS answers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{NetworkConfig, NetworkMode};
use crate::sandbox::ContainerRuntime;

use super::cache::CacheStore;
use super::error::NetworkError;
use super::firewall::{FirewallBackend, RuleTable};
use super::resolver::{DnsLookup, Resolver};
use super::rules::GATEWAY_DOMAIN;

/// Attempts (at one per second) to wait for a DHCP-assigned address.
/// CI environments with parallel containers can be slow to assign.
const MAX_IP_WAIT_SECS: u32 = 60;

/// Shared state the session flow and the refresher both touch.
///
/// A single mutex serializes them; there is exactly one refresher per
/// manager and one manager per container, so no further locking exists.
pub(crate) struct AllowlistState {
    pub(crate) resolver: Resolver,
    pub(crate) backend: FirewallBackend,
}

struct Refresher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Orchestrates network isolation for a single container.
pub struct NetworkManager {
    cfg: NetworkConfig,
    runtime: Arc<dyn ContainerRuntime>,
    table: Arc<dyn RuleTable>,
    store: CacheStore,
    dns: Arc<dyn DnsLookup>,
    container_ip: Option<String>,
    allowlist: Option<Arc<Mutex<AllowlistState>>>,
    refresher: Option<Refresher>,
}

impl NetworkManager {
    pub fn new(
        cfg: NetworkConfig,
        runtime: Arc<dyn ContainerRuntime>,
        table: Arc<dyn RuleTable>,
        store: CacheStore,
        dns: Arc<dyn DnsLookup>,
    ) -> Self {
        Self {
            cfg,
            runtime,
            table,
            store,
            dns,
            container_ip: None,
            allowlist: None,
            refresher: None,
        }
    }

    pub fn mode(&self) -> NetworkMode {
        self.cfg.mode
    }

    /// Configures network isolation for a container according to the mode.
    pub async fn setup_for_container(&mut self, container_name: &str) -> Result<()> {
        match self.cfg.mode {
            NetworkMode::Open => {
                // The host FORWARD policy accepts by default, so open mode
                // needs no rules and no address discovery.
                info!("Network mode: open (no restrictions)");
                Ok(())
            }
            NetworkMode::Restricted => self.setup_restricted(container_name).await,
            NetworkMode::Allowlist => self.setup_allowlist(container_name).await,
        }
    }

    async fn setup_restricted(&mut self, container_name: &str) -> Result<()> {
        info!("Network mode: restricted (blocking local/internal networks)");

        self.table.check_available().await?;

        let container_ip = self.wait_for_container_ip(container_name).await?;
        info!("Container IP: {container_ip}");
        self.container_ip = Some(container_ip.clone());

        let gateway_ip = self.discover_gateway().await;

        let backend = FirewallBackend::new(Arc::clone(&self.table), container_ip, gateway_ip);
        backend.apply_restricted(&self.cfg).await?;

        if self.cfg.block_private_networks {
            info!("  Blocking private networks (RFC1918)");
        }
        if self.cfg.block_metadata_endpoint {
            info!("  Blocking cloud metadata endpoints");
        }

        Ok(())
    }

    async fn setup_allowlist(&mut self, container_name: &str) -> Result<()> {
        info!("Network mode: allowlist (domain-based filtering)");

        self.table.check_available().await?;

        if self.cfg.allowed_domains.is_empty() {
            return Err(NetworkError::EmptyAllowlist.into());
        }

        let container_ip = self.wait_for_container_ip(container_name).await?;
        info!("Container IP: {container_ip}");
        self.container_ip = Some(container_ip.clone());

        let gateway_ip = self.discover_gateway().await;

        let cache = self.store.load(container_name);
        let mut resolver = Resolver::new(cache, Arc::clone(&self.dns));

        info!(
            "Resolving {} allowed domains...",
            self.cfg.allowed_domains.len()
        );
        let mut domain_ips = resolver.resolve_all(&self.cfg.allowed_domains).await;
        if domain_ips.is_empty() {
            return Err(NetworkError::AllDomainsFailed.into());
        }
        merge_gateway(&mut domain_ips, gateway_ip.as_deref());

        let total: usize = domain_ips.values().map(Vec::len).sum();
        info!("Resolved {} domains to {total} IPs", domain_ips.len());
        for (domain, ips) in &domain_ips {
            debug!("  {domain} -> {} IPs", ips.len());
        }

        resolver.update_cache(domain_ips.clone());
        if let Err(e) = self.store.save(container_name, resolver.cache()) {
            warn!("Failed to save IP cache: {e:#}");
        }

        let backend = FirewallBackend::new(
            Arc::clone(&self.table),
            container_ip,
            gateway_ip.clone(),
        );
        backend.apply_allowlist(&self.cfg, &domain_ips).await?;

        info!("  Allowing only specified domains");

        let state = Arc::new(Mutex::new(AllowlistState { resolver, backend }));
        self.allowlist = Some(Arc::clone(&state));
        self.start_refresher(state, container_name.to_string(), gateway_ip);

        Ok(())
    }

    /// Removes network isolation. Never fatal: container cleanup elsewhere
    /// must not be blocked by firewall-state errors.
    pub async fn teardown(&mut self, container_name: &str) -> Result<()> {
        self.stop_refresher().await;

        if self.cfg.mode == NetworkMode::Open {
            return Ok(());
        }

        // Recover the address if setup never got that far.
        let container_ip = match &self.container_ip {
            Some(ip) => ip.clone(),
            None => match self.runtime.container_ipv4(container_name).await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!("Could not get container IP for cleanup: {e:#}");
                    return Ok(());
                }
            },
        };

        let backend = FirewallBackend::new(Arc::clone(&self.table), container_ip, None);
        if let Err(e) = backend.remove_rules().await {
            warn!("Failed to remove firewall rules: {e}");
            return Ok(());
        }

        info!("Firewall rules removed for {container_name}");
        Ok(())
    }

    async fn wait_for_container_ip(&self, container_name: &str) -> Result<String, NetworkError> {
        for attempt in 1..=MAX_IP_WAIT_SECS {
            if let Ok(ip) = self.runtime.container_ipv4(container_name).await {
                if !ip.is_empty() {
                    return Ok(ip);
                }
            }

            // The last failed attempt errors immediately, no trailing sleep.
            if attempt == MAX_IP_WAIT_SECS {
                break;
            }
            if attempt % 10 == 0 {
                info!("Still waiting for container IP... ({attempt}/{MAX_IP_WAIT_SECS} seconds)");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        Err(NetworkError::AddressTimeout {
            container: container_name.to_string(),
        })
    }

    async fn discover_gateway(&self) -> Option<String> {
        match self.runtime.gateway_ipv4().await {
            Ok(gateway) => {
                info!("Gateway IP: {gateway}");
                Some(gateway)
            }
            Err(e) => {
                warn!("Could not auto-detect gateway IP: {e:#}");
                None
            }
        }
    }

    fn start_refresher(
        &mut self,
        state: Arc<Mutex<AllowlistState>>,
        container_name: String,
        gateway_ip: Option<String>,
    ) {
        if self.cfg.refresh_interval_minutes <= 0 {
            info!("IP refresh disabled (refresh_interval_minutes <= 0)");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval_minutes = self.cfg.refresh_interval_minutes as u64;
        let cfg = self.cfg.clone();
        let store = self.store.clone();

        info!("Starting IP refresh every {interval_minutes} minutes");

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(interval_minutes * 60));
            // The first tick of an interval completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("IP refresh: checking for updated IPs...");
                        if let Err(e) = refresh_allowed_ips(
                            &state,
                            &cfg,
                            &store,
                            &container_name,
                            gateway_ip.as_deref(),
                        )
                        .await
                        {
                            warn!("IP refresh failed: {e}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("IP refresher stopped");
                        return;
                    }
                }
            }
        });

        self.refresher = Some(Refresher { shutdown, handle });
    }

    /// Signals the refresher to exit at the next loop iteration and waits
    /// for it. An in-flight rule reapplication finishes before this
    /// returns, so teardown's rule removal always runs last.
    async fn stop_refresher(&mut self) {
        if let Some(refresher) = self.refresher.take() {
            let _ = refresher.shutdown.send(true);
            let _ = refresher.handle.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn allowlist_state(&self) -> Option<Arc<Mutex<AllowlistState>>> {
        self.allowlist.clone()
    }

    #[cfg(test)]
    pub(crate) fn refresher_running(&self) -> bool {
        self.refresher.is_some()
    }
}

fn merge_gateway(domain_ips: &mut BTreeMap<String, Vec<String>>, gateway_ip: Option<&str>) {
    if let Some(gateway) = gateway_ip {
        if gateway.parse::<std::net::Ipv4Addr>().is_ok() {
            domain_ips.insert(GATEWAY_DOMAIN.to_string(), vec![gateway.to_string()]);
        }
    }
}

/// One refresh tick: re-resolve, diff against the cache, and only on a
/// change remove the old rules and reapply. Remove-before-apply is load
/// bearing: the brief window is under-permissive (default deny), never
/// double-allowing two address sets.
pub(crate) async fn refresh_allowed_ips(
    state: &Mutex<AllowlistState>,
    cfg: &NetworkConfig,
    store: &CacheStore,
    container_name: &str,
    gateway_ip: Option<&str>,
) -> Result<(), NetworkError> {
    let mut state = state.lock().await;

    let mut new_ips = state.resolver.resolve_all(&cfg.allowed_domains).await;
    if new_ips.is_empty() {
        return Err(NetworkError::AllDomainsFailed);
    }
    merge_gateway(&mut new_ips, gateway_ip);

    if state.resolver.ips_unchanged(&new_ips) {
        debug!("IP refresh: no changes detected");
        return Ok(());
    }

    let total: usize = new_ips.values().map(Vec::len).sum();
    info!("IP refresh: updating firewall rules with {total} IPs");

    if let Err(e) = state.backend.remove_rules().await {
        warn!("Failed to remove old rules: {e}");
    }
    state.backend.apply_allowlist(cfg, &new_ips).await?;

    state.resolver.update_cache(new_ips);
    if let Err(e) = store.save(container_name, state.resolver.cache()) {
        warn!("Failed to save IP cache: {e:#}");
    }

    info!("IP refresh: firewall rules updated");
    Ok(())
}
