//! Storage configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, StateError};

/// Prefix applied to every logical key by default.
pub const DEFAULT_PREFIX: &str = "pm_";

/// Approximate capacity of a browser storage area, in code units.
pub const DEFAULT_CAPACITY: u64 = 5 * 1024 * 1024;

/// Settings shared by the managers and backends of one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Namespace prepended to logical keys.
    pub prefix: String,
    /// Budget reported by `storage_info`. Not enforced.
    pub approximate_capacity: u64,
    /// Hard quota enforced by the backend, if any.
    pub backend_quota: Option<u64>,
    /// Buffered change events per watcher before it starts lagging.
    pub watch_capacity: usize,
    /// Database file for the durable backend.
    pub sqlite_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            approximate_capacity: DEFAULT_CAPACITY,
            backend_quota: None,
            watch_capacity: 1024,
            sqlite_path: None,
        }
    }
}

impl StorageConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: StorageConfig =
            serde_json::from_str(text).map_err(|e| StateError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_prefix(&self.prefix)?;
        if self.watch_capacity == 0 {
            return Err(StateError::InvalidConfig(
                "watch_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A namespace prefix must be non-empty, or `clear()` would reach foreign keys.
///
/// Prefixes sharing a namespace must also not nest: with `pm_` and
/// `pm_admin_` on one backend, `pm_`'s `clear()` and `keys()` see the other
/// manager's entries. That cannot be checked per manager.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(StateError::InvalidConfig(
            "prefix cannot be empty; clear() would reach foreign keys".to_string(),
        ));
    }
    Ok(())
}
