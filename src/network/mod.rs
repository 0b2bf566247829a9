//! Network isolation for sandbox containers.
//!
//! Layers policy-driven egress control on top of the container
//! lifecycle: pure rule builders, a DNS resolver with change detection,
//! a per-container IP cache, a firewalld-backed rule installer, and the
//! manager that drives them plus the background refresh task.

mod cache;
mod error;
mod firewall;
mod manager;
mod resolver;
mod rules;

pub use cache::CacheStore;
pub use error::NetworkError;
pub use firewall::{Firewalld, RuleTable};
pub use manager::NetworkManager;
pub use resolver::{DnsLookup, SystemDns};
