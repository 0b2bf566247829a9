//! On-disk persistence for per-container IP cache snapshots.
//!
//! One JSON file per container name. A missing file is a normal cold
//! start, not an error, and saves replace the whole file atomically via
//! a temp-file rename so a concurrent reader never sees a torn write.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use super::resolver::IpCache;

/// Loads and saves [`IpCache`] snapshots keyed by container name.
#[derive(Debug, Clone)]
pub struct CacheStore {
    base_dir: PathBuf,
}

impl CacheStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The store under the user's home directory (falls back to /tmp).
    pub fn default_location() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
        Self::new(home.join(".warden").join("ip-cache"))
    }

    fn cache_path(&self, container: &str) -> PathBuf {
        self.base_dir.join(format!("{container}.json"))
    }

    /// Loads the snapshot for a container.
    ///
    /// Missing or unreadable files yield an empty cache; an unparseable
    /// file is logged and treated the same way.
    pub fn load(&self, container: &str) -> IpCache {
        let path = self.cache_path(container);
        if !path.exists() {
            return IpCache::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cache) => cache,
                Err(e) => {
                    warn!("Ignoring corrupt IP cache {}: {e}", path.display());
                    IpCache::default()
                }
            },
            Err(e) => {
                warn!("Failed to read IP cache {}: {e}", path.display());
                IpCache::default()
            }
        }
    }

    /// Persists the full snapshot, replacing any prior content.
    pub fn save(&self, container: &str, cache: &IpCache) -> Result<()> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create cache directory: {}", self.base_dir.display())
        })?;

        let path = self.cache_path(container);
        let content =
            serde_json::to_string_pretty(cache).context("Failed to serialize IP cache")?;

        // Write-then-rename keeps the visible file whole at all times.
        let tmp_path = tmp_sibling(&path);
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write IP cache: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to replace IP cache: {}", path.display()))?;

        Ok(())
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_cache() -> IpCache {
        let mut domains = BTreeMap::new();
        domains.insert(
            "api.example.com".to_string(),
            vec!["1.2.3.4".to_string(), "5.6.7.8".to_string()],
        );
        IpCache {
            domains,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());
        let cache = sample_cache();

        store.save("warden-test", &cache).unwrap();
        let loaded = store.load("warden-test");

        assert_eq!(loaded, cache);
    }

    #[test]
    fn test_load_cold_start_returns_empty() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        let loaded = store.load("never-saved");
        assert!(loaded.domains.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_returns_empty() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let loaded = store.load("broken");
        assert!(loaded.domains.is_empty());
    }

    #[test]
    fn test_save_overwrites_prior_snapshot() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        store.save("warden-test", &sample_cache()).unwrap();

        let mut replacement = IpCache::default();
        replacement.domains.insert(
            "cdn.example.com".to_string(),
            vec!["10.20.30.40".to_string()],
        );
        store.save("warden-test", &replacement).unwrap();

        let loaded = store.load("warden-test");
        assert_eq!(loaded.domains.len(), 1);
        assert!(loaded.domains.contains_key("cdn.example.com"));
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(dir.path());

        store.save("warden-test", &sample_cache()).unwrap();
        assert!(!dir.path().join("warden-test.json.tmp").exists());
    }
}
