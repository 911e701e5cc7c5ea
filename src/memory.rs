//! In-memory storage backend.
//!
//! Session-scoped: data lives as long as some handle to it does and is lost
//! on process exit. Handles forked with [`MemoryBackend::fork_context`] share
//! entries, which is how several tabs of one session are modelled.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{code_units, validate_key, QuotaEstimate, StorageBackend};
use crate::error::{Result, StateError};
use crate::watch::{ContextId, StorageEvent, WatchSender, WatchStream};

/// Entries in insertion order. Overwrites keep their slot, removals close
/// the gap, matching the order `SqliteBackend` enumerates in.
#[derive(Default)]
struct Entries(Vec<(String, String)>);

impl Entries {
    fn position(&self, key: &str) -> Option<usize> {
        self.0.iter().position(|(k, _)| k == key)
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.position(key).map(|i| &self.0[i].1)
    }

    fn insert(&mut self, key: &str, value: String) -> Option<String> {
        match self.position(key) {
            Some(i) => Some(std::mem::replace(&mut self.0[i].1, value)),
            None => {
                self.0.push((key.to_string(), value));
                None
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|i| self.0.remove(i).1)
    }

    fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(k, _)| k)
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn usage(&self) -> u64 {
        self.0
            .iter()
            .map(|(k, v)| (code_units(k) + code_units(v)) as u64)
            .sum()
    }
}

/// In-memory implementation of StorageBackend.
///
/// Enumerates keys in insertion order.
pub struct MemoryBackend {
    data: Arc<RwLock<Entries>>,
    watcher: WatchSender,
    quota: Option<u64>,
    context: ContextId,
}

impl MemoryBackend {
    /// Create a new empty backend with no quota.
    pub fn new() -> Self {
        Self::with_quota(None)
    }

    /// Create a backend that rejects writes once `quota` code units are used.
    pub fn with_quota(quota: Option<u64>) -> Self {
        Self::with_options(quota, 1024)
    }

    pub fn with_options(quota: Option<u64>, watch_capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(Entries::default())),
            watcher: WatchSender::new(watch_capacity),
            quota,
            context: ContextId::next(),
        }
    }

    /// A new handle over the same entries, writing as a different context.
    pub fn fork_context(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            watcher: self.watcher.clone(),
            quota: self.quota,
            context: ContextId::next(),
        }
    }

    /// Get the number of entries in the backend.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the backend is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().len() == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;

        let mut data = self.data.write();

        if let Some(quota) = self.quota {
            let replaced = data
                .get(key)
                .map(|old| (code_units(key) + code_units(old)) as u64)
                .unwrap_or(0);
            let added = (code_units(key) + code_units(value)) as u64;
            let projected = data.usage() - replaced + added;
            if projected > quota {
                return Err(StateError::StorageFull(format!(
                    "writing {key} needs {projected} of {quota} code units"
                )));
            }
        }

        let old = data.insert(key, value.to_string());
        drop(data);

        debug!(key, context = %self.context, "memory set");
        self.watcher
            .send(StorageEvent::set(key, old, value.to_string(), self.context));
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let removed = self.data.write().remove(key);
        if let Some(old) = removed {
            self.watcher
                .send(StorageEvent::removed(key, old, self.context));
        }
        Ok(())
    }

    async fn key(&self, index: usize) -> Result<Option<String>> {
        Ok(self.data.read().keys().nth(index).cloned())
    }

    async fn length(&self) -> Result<usize> {
        Ok(self.data.read().len())
    }

    fn watch(&self, pattern: &str) -> Result<WatchStream> {
        Ok(self.watcher.subscribe_foreign(pattern, self.context))
    }

    fn watch_all(&self, pattern: &str) -> Result<WatchStream> {
        Ok(self.watcher.subscribe_all(pattern))
    }

    fn context(&self) -> ContextId {
        self.context
    }

    async fn estimate(&self) -> Option<QuotaEstimate> {
        let usage = self.data.read().usage();
        Some(QuotaEstimate {
            quota: self.quota,
            usage,
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
