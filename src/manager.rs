//! Namespaced storage manager.
//!
//! A [`StorageManager`] owns one key prefix on one backend. Every logical key
//! is stored as `<prefix><key>`; versioned entries keep their schema version
//! in a companion key `<prefix><key>_version`.
//!
//! Reads fail open: decode errors, backend errors and rejected values are
//! logged and the caller gets the default. Writes fail closed and return an
//! error naming the key.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::backend::{code_units, QuotaEstimate, StorageBackend};
use crate::codec::{self, StoredValue, ValueKind};
use crate::config::{validate_prefix, StorageConfig, DEFAULT_CAPACITY};
use crate::error::{Result, StateError};
use crate::memory::MemoryBackend;
use crate::sqlite::SqliteBackend;
use crate::watch::WatchStream;

/// Suffix of the companion key that records an entry's schema version.
pub const VERSION_SUFFIX: &str = "_version";

/// Version assumed for entries written before versioning was requested.
pub const INITIAL_VERSION: u32 = 1;

pub type Validator = Arc<dyn Fn(&StoredValue) -> bool + Send + Sync>;
pub type Migrator =
    Arc<dyn Fn(StoredValue, u32) -> std::result::Result<StoredValue, String> + Send + Sync>;
pub type Serializer = Arc<dyn Fn(&StoredValue) -> Result<String> + Send + Sync>;
pub type Deserializer = Arc<dyn Fn(&str) -> Result<StoredValue> + Send + Sync>;

/// Per-call options for [`StorageManager::get`] and [`StorageManager::set`].
#[derive(Clone, Default)]
pub struct StorageOptions {
    default_value: Option<StoredValue>,
    serialize: Option<Serializer>,
    deserialize: Option<Deserializer>,
    validate: Option<Validator>,
    kind: Option<ValueKind>,
    version: Option<u32>,
    migrate: Option<Migrator>,
    stepwise: bool,
}

impl fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageOptions")
            .field("default_value", &self.default_value)
            .field("serialize", &self.serialize.is_some())
            .field("deserialize", &self.deserialize.is_some())
            .field("validate", &self.validate.is_some())
            .field("kind", &self.kind)
            .field("version", &self.version)
            .field("migrate", &self.migrate.is_some())
            .field("stepwise", &self.stepwise)
            .finish()
    }
}

impl StorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned when the key is absent or its entry is discarded.
    pub fn default_value(mut self, value: impl Into<StoredValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn serialize(
        mut self,
        f: impl Fn(&StoredValue) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.serialize = Some(Arc::new(f));
        self
    }

    pub fn deserialize(
        mut self,
        f: impl Fn(&str) -> Result<StoredValue> + Send + Sync + 'static,
    ) -> Self {
        self.deserialize = Some(Arc::new(f));
        self
    }

    /// Predicate a loaded value must pass; failing entries are deleted.
    pub fn validate(mut self, f: impl Fn(&StoredValue) -> bool + Send + Sync + 'static) -> Self {
        self.validate = Some(Arc::new(f));
        self
    }

    /// Require the loaded value to be of `kind`; failing entries are deleted.
    pub fn expect_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Schema version of the caller's view of this entry.
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Upgrade a value stored at an older version. Only consulted together
    /// with [`StorageOptions::version`].
    pub fn migrate(
        mut self,
        f: impl Fn(StoredValue, u32) -> std::result::Result<StoredValue, String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.migrate = Some(Arc::new(f));
        self
    }

    /// Call the migrator once per version step instead of once per read.
    pub fn stepwise_migration(mut self, stepwise: bool) -> Self {
        self.stepwise = stepwise;
        self
    }

    pub fn default_ref(&self) -> Option<&StoredValue> {
        self.default_value.as_ref()
    }

    pub(crate) fn fallback(&self) -> Option<StoredValue> {
        self.default_value.clone()
    }

    pub(crate) fn accepts(&self, value: &StoredValue) -> bool {
        if let Some(kind) = self.kind {
            if value.kind() != kind {
                return false;
            }
        }
        match &self.validate {
            Some(validate) => validate(value),
            None => true,
        }
    }

    pub(crate) fn encode(&self, value: &StoredValue) -> Result<String> {
        match &self.serialize {
            Some(serialize) => serialize(value),
            None => codec::encode(value),
        }
    }

    pub(crate) fn decode(&self, text: &str) -> Result<StoredValue> {
        match &self.deserialize {
            Some(deserialize) => deserialize(text),
            None => codec::decode(text),
        }
    }
}

/// Space accounting for one manager's namespace, in code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageInfo {
    pub used: u64,
    pub total: u64,
    pub available: u64,
}

/// Namespaced CRUD over a single backend.
pub struct StorageManager<B: StorageBackend + ?Sized> {
    backend: Arc<B>,
    prefix: String,
    capacity: u64,
}

impl<B: StorageBackend + ?Sized> Clone for StorageManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            prefix: self.prefix.clone(),
            capacity: self.capacity,
        }
    }
}

impl<B: StorageBackend + ?Sized> StorageManager<B> {
    /// Manager over `backend` owning every key that starts with `prefix`.
    ///
    /// Fails with [`StateError::InvalidConfig`] for an empty prefix. Managers
    /// sharing a backend need prefixes where neither is a prefix of the other.
    pub fn new(backend: Arc<B>, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self {
            backend,
            prefix,
            capacity: DEFAULT_CAPACITY,
        })
    }

    pub fn from_config(backend: Arc<B>, config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            prefix: config.prefix.clone(),
            capacity: config.approximate_capacity,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Backend key for a logical key.
    pub fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn version_key(&self, key: &str) -> String {
        format!("{}{}{}", self.prefix, key, VERSION_SUFFIX)
    }

    /// Encode `value` and write it under `key`.
    pub async fn set(&self, key: &str, value: &StoredValue, options: &StorageOptions) -> Result<()> {
        let encoded = options
            .encode(value)
            .map_err(|e| StateError::codec(key, e))?;

        self.backend
            .set_item(&self.full_key(key), &encoded)
            .await
            .map_err(|e| {
                error!(key, "storage write failed: {e}");
                StateError::write(key, e)
            })?;

        if let Some(version) = options.version {
            self.backend
                .set_item(&self.version_key(key), &version.to_string())
                .await
                .map_err(|e| {
                    error!(key, "storage version write failed: {e}");
                    StateError::write(key, e)
                })?;
        }

        debug!(key, prefix = %self.prefix, "stored value");
        Ok(())
    }

    /// Serialize a typed value and write it under `key`.
    pub async fn set_as<T: Serialize + ?Sized + Sync>(
        &self,
        key: &str,
        value: &T,
        options: &StorageOptions,
    ) -> Result<()> {
        let stored = StoredValue::from_serialize(value).map_err(|e| StateError::codec(key, e))?;
        self.set(key, &stored, options).await
    }

    /// Read `key`, falling back to the default on any failure.
    pub async fn get(&self, key: &str, options: &StorageOptions) -> Option<StoredValue> {
        match self.try_get(key, options).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "storage read failed, using default: {e}");
                options.fallback()
            }
        }
    }

    /// Read a typed value; `None` when absent, invalid or not a `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &StorageOptions,
    ) -> Option<T> {
        let value = self.get(key, options).await?;
        match value.to_deserialize() {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key, "stored value has unexpected shape: {e}");
                None
            }
        }
    }

    /// Read `key`, reporting backend and decode failures to the caller.
    ///
    /// Rejected values are still treated as corrupt: they are removed and
    /// the default is returned.
    pub async fn try_get(&self, key: &str, options: &StorageOptions) -> Result<Option<StoredValue>> {
        let Some(raw) = self.backend.get_item(&self.full_key(key)).await? else {
            return Ok(options.fallback());
        };

        let mut value = options
            .decode(&raw)
            .map_err(|e| StateError::codec(key, e))?;

        if let (Some(target), Some(migrate)) = (options.version, options.migrate.as_ref()) {
            value = self.migrate(key, value, target, migrate, options).await?;
        }

        if !options.accepts(&value) {
            warn!(key, kind = %value.kind(), "stored value failed validation, removing");
            if let Err(e) = self.remove(key).await {
                warn!(key, "could not remove invalid entry: {e}");
            }
            return Ok(options.fallback());
        }

        Ok(Some(value))
    }

    async fn stored_version(&self, key: &str) -> Result<u32> {
        let raw = self.backend.get_item(&self.version_key(key)).await?;
        Ok(match raw {
            Some(text) => text.trim().parse().unwrap_or_else(|_| {
                warn!(key, version = %text, "unreadable version marker");
                INITIAL_VERSION
            }),
            None => INITIAL_VERSION,
        })
    }

    async fn migrate(
        &self,
        key: &str,
        value: StoredValue,
        target: u32,
        migrate: &Migrator,
        options: &StorageOptions,
    ) -> Result<StoredValue> {
        let stored = self.stored_version(key).await?;
        if stored >= target {
            return Ok(value);
        }

        let outcome = if options.stepwise {
            (stored..target).try_fold(value.clone(), |current, from| {
                migrate(current, from).map_err(|reason| StateError::Migration { from, reason })
            })
        } else {
            migrate(value.clone(), stored)
                .map_err(|reason| StateError::Migration { from: stored, reason })
        };

        let migrated = match outcome {
            Ok(migrated) => migrated,
            Err(e) => {
                warn!(key, "migration to version {target} failed, keeping stored value: {e}");
                return Ok(value);
            }
        };

        let persisted = options.clone().version(target);
        match self.set(key, &migrated, &persisted).await {
            Ok(()) => debug!(key, from = stored, to = target, "migrated entry"),
            Err(e) => warn!(key, "migrated value not persisted: {e}"),
        }
        Ok(migrated)
    }

    /// Delete `key` and its version marker. Absent keys are not an error.
    pub async fn remove(&self, key: &str) -> Result<()> {
        for full in [self.full_key(key), self.version_key(key)] {
            self.backend.remove_item(&full).await.map_err(|e| {
                error!(key, "storage remove failed: {e}");
                StateError::write(key, e)
            })?;
        }
        Ok(())
    }

    /// Whether `key` exists, without decoding it.
    pub async fn has(&self, key: &str) -> bool {
        match self.backend.contains(&self.full_key(key)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, "storage existence check failed: {e}");
                false
            }
        }
    }

    /// Remove every key under this manager's prefix, and nothing else.
    pub async fn clear(&self) -> Result<()> {
        let owned = self.backend.keys_with_prefix(&self.prefix).await?;
        for full in &owned {
            self.backend
                .remove_item(full)
                .await
                .map_err(|e| StateError::write(full.clone(), e))?;
        }
        debug!(prefix = %self.prefix, removed = owned.len(), "cleared namespace");
        Ok(())
    }

    /// Logical keys under this prefix, in backend order. Version markers of
    /// present entries are not listed.
    pub async fn keys(&self) -> Vec<String> {
        let owned = match self.backend.keys_with_prefix(&self.prefix).await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(prefix = %self.prefix, "storage enumeration failed: {e}");
                return Vec::new();
            }
        };

        let logical: Vec<String> = owned
            .iter()
            .map(|full| full[self.prefix.len()..].to_string())
            .collect();

        logical
            .iter()
            .filter(|key| match key.strip_suffix(VERSION_SUFFIX) {
                Some(base) => !logical.iter().any(|other| other == base),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Rough space accounting for this namespace. `total` is a budget, not
    /// the backend's real quota.
    pub async fn storage_info(&self) -> StorageInfo {
        let mut used: u64 = 0;
        match self.backend.keys_with_prefix(&self.prefix).await {
            Ok(owned) => {
                for full in owned {
                    if let Ok(Some(value)) = self.backend.get_item(&full).await {
                        used += (code_units(&full) + code_units(&value)) as u64;
                    }
                }
            }
            Err(e) => warn!(prefix = %self.prefix, "storage accounting failed: {e}"),
        }
        StorageInfo {
            used,
            total: self.capacity,
            available: self.capacity.saturating_sub(used),
        }
    }

    /// Ask the backend for its quota; unlimited when it cannot say.
    pub async fn estimate_quota(&self) -> QuotaEstimate {
        self.backend
            .estimate()
            .await
            .unwrap_or_else(QuotaEstimate::unlimited)
    }

    /// Changes to `key` made by other contexts.
    pub fn watch(&self, key: &str) -> Result<WatchStream> {
        self.backend.watch(&self.full_key(key))
    }

    /// Changes to `key` from every context, this one included.
    pub fn watch_all(&self, key: &str) -> Result<WatchStream> {
        self.backend.watch_all(&self.full_key(key))
    }
}

/// The durable and session-scoped managers of one application.
pub struct StorageService {
    pub local: StorageManager<dyn StorageBackend>,
    pub session: StorageManager<dyn StorageBackend>,
}

impl StorageService {
    /// Durable storage goes to SQLite when `sqlite_path` is set, otherwise
    /// both scopes are in memory.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        let local: Arc<dyn StorageBackend> = match &config.sqlite_path {
            Some(path) => Arc::new(
                SqliteBackend::open(path)
                    .await?
                    .with_quota(config.backend_quota)
                    .with_watch_capacity(config.watch_capacity),
            ),
            None => Arc::new(MemoryBackend::with_options(
                config.backend_quota,
                config.watch_capacity,
            )),
        };
        let session: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::with_options(
            config.backend_quota,
            config.watch_capacity,
        ));

        Ok(Self {
            local: StorageManager::from_config(local, config)?,
            session: StorageManager::from_config(session, config)?,
        })
    }
}
