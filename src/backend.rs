//! `StorageBackend` trait - the string key/value contract every store implements.
//!
//! The shape mirrors Web Storage: string keys, string values, positional
//! enumeration through `key(index)` and `length()`, plus change
//! notification. Two implementations ship with the crate:
//!
//! - [`MemoryBackend`](crate::memory::MemoryBackend): session scope
//! - [`SqliteBackend`](crate::sqlite::SqliteBackend): durable scope

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StateError};
use crate::watch::{ContextId, WatchStream};

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Validate that a key is well-formed.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StateError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StateError::InvalidKey(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Length of a string in UTF-16 code units, the unit browsers budget in.
pub fn code_units(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Result of asking a backend how much room it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaEstimate {
    /// Total quota in code units, `None` when unbounded.
    pub quota: Option<u64>,
    /// Code units currently in use across the whole backend.
    pub usage: u64,
}

impl QuotaEstimate {
    /// Estimate reported when the backend cannot provide one.
    pub fn unlimited() -> Self {
        Self {
            quota: None,
            usage: 0,
        }
    }

    /// Whether `needed` more code units would still fit.
    pub fn has_room_for(&self, needed: u64) -> bool {
        match self.quota {
            Some(quota) => self.usage.saturating_add(needed) <= quota,
            None => true,
        }
    }
}

/// The storage backend trait.
///
/// One handle belongs to one execution context; handles forked from it
/// share data but report their writes under their own [`ContextId`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a raw value. Returns `None` if the key does not exist.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write a raw value, creating or overwriting the key.
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Key at `index` in native enumeration order.
    async fn key(&self, index: usize) -> Result<Option<String>>;

    /// Number of keys in the backend.
    async fn length(&self) -> Result<usize>;

    /// Watch changes made by other contexts.
    ///
    /// Pattern can be an exact key or end with `*` for prefix matching.
    fn watch(&self, pattern: &str) -> Result<WatchStream>;

    /// Watch changes from every context, including this one.
    fn watch_all(&self, pattern: &str) -> Result<WatchStream>;

    /// The context this handle writes as.
    fn context(&self) -> ContextId;

    /// Ask the backend for its quota. `None` means it cannot tell.
    async fn estimate(&self) -> Option<QuotaEstimate> {
        None
    }

    /// Check if a key exists without returning its value.
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get_item(key).await?.is_some())
    }

    /// Enumerate keys starting with `prefix`, in native order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let len = self.length().await?;
        let mut keys = Vec::new();
        for index in 0..len {
            if let Some(key) = self.key(index).await? {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}
