//! Engine configuration
//!
//! Settings for the build cache and rebuild sessions. Stored as RON,
//! the same format the model request files use.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SHARD_COUNT;
use crate::error::ConfigError;

/// Build cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of lock shards (concurrent builds of different hashes
    /// only contend when they fall into the same shard table)
    pub shard_count: usize,
    /// Maximum number of entries; `None` keeps the cache unbounded
    pub capacity: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            capacity: None,
        }
    }
}

impl CacheConfig {
    /// Unbounded cache with the default shard count
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// LRU-bounded cache
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }
}

/// Rebuild session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// After a completed rebuild, drop cache entries the rebuild did not touch
    pub prune_unused_after_rebuild: bool,
    /// Keep building the remaining symbols after one of them failed
    pub continue_after_failure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prune_unused_after_rebuild: false,
            continue_after_failure: true,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub session: SessionConfig,
    /// `tracing` filter directive used when `RUST_LOG` is not set
    pub log_filter: Option<String>,
}

impl Config {
    /// Parse a configuration from RON text
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        ron::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_ron_str(&content)
    }

    /// Save the configuration as pretty RON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }
}
