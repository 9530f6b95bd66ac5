//! Hub configuration, persisted as TOML.
//!
//! ```toml
//! namespace = "Graph"
//! log_filter = "info,topohub_core=debug"
//!
//! [cache]
//! capacity = 4096
//!
//! [pool]
//! queue_depth = 1024
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::Path,
};

use crate::{backend::DEFAULT_CACHE_CAPACITY, codec::NAMESPACE, error::TopologyError};

pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Messages buffered per connection before senders wait
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Namespace the agent endpoint subscribes to
    pub namespace: String,
    /// Fallback tracing filter when RUST_LOG is unset
    pub log_filter: String,
    pub cache: CacheConfig,
    pub pool: PoolConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            namespace: NAMESPACE.to_string(),
            log_filter: "info".to_string(),
            cache: CacheConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl HubConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<HubConfig, TopologyError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read hub config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(HubConfig::default());
        }
        let content = read_to_string(path)?;
        let config: HubConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TopologyError> {
        tracing::debug!("Attempting to write hub config to: {:?}", path.as_ref());
        let toml_string = toml::to_string(self)?;
        write(path, toml_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.namespace.is_empty() {
            return Err(TopologyError::Config("namespace must not be empty".to_string()));
        }
        if self.cache.capacity == 0 {
            return Err(TopologyError::Config("cache.capacity must be positive".to_string()));
        }
        if self.pool.queue_depth == 0 {
            return Err(TopologyError::Config("pool.queue_depth must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use test_log::test;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = HubConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.namespace, "Graph");
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        std::fs::write(&path, "[cache]\ncapacity = 8\n").unwrap();

        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.pool.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        let config = HubConfig {
            namespace: "Topology".to_string(),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(HubConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_or_invalid_files_are_config_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        std::fs::write(&path, "namespace = [").unwrap();
        assert!(matches!(HubConfig::load(&path), Err(TopologyError::Config(_))));

        std::fs::write(&path, "[pool]\nqueue_depth = 0\n").unwrap();
        assert!(matches!(HubConfig::load(&path), Err(TopologyError::Config(_))));
    }
}
