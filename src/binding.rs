//! Reactive bindings over a storage manager.
//!
//! A binding caches one key's value. It starts in the loading state, is
//! filled by [`StorageBinding::load`], and writes through on
//! [`StorageBinding::set`]. The backend stays the source of truth: writes
//! made through another binding are only seen after a reload or through a
//! watch task.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::codec::{StoredValue, ValueKind};
use crate::error::{Result, StateError};
use crate::manager::{StorageManager, StorageOptions};
use crate::watch::WatchStream;

/// Which writes a watch task reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Only writes from other contexts, like browser `storage` events.
    #[default]
    CrossContext,
    /// Writes from every context, including other bindings in this one.
    AllContexts,
}

#[derive(Debug)]
struct BindingState {
    value: Option<StoredValue>,
    loading: bool,
}

/// Aborts the watch task when dropped.
#[derive(Debug)]
pub struct WatchGuard {
    handle: JoinHandle<()>,
}

impl WatchGuard {
    pub fn stop(self) {}

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A cached, write-through view of one key.
pub struct StorageBinding<B: StorageBackend + ?Sized> {
    manager: StorageManager<B>,
    key: String,
    options: StorageOptions,
    state: Arc<RwLock<BindingState>>,
    sync: SyncMode,
}

impl<B: StorageBackend + ?Sized> StorageBinding<B> {
    pub fn new(manager: StorageManager<B>, key: impl Into<String>, options: StorageOptions) -> Self {
        let state = BindingState {
            value: options.default_ref().cloned(),
            loading: true,
        };
        Self {
            manager,
            key: key.into(),
            options,
            state: Arc::new(RwLock::new(state)),
            sync: SyncMode::default(),
        }
    }

    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the current value from storage into the cache.
    pub async fn load(&self) -> Option<StoredValue> {
        let value = self.manager.get(&self.key, &self.options).await;
        let mut state = self.state.write();
        state.value = value.clone();
        state.loading = false;
        value
    }

    /// Re-read after an out-of-band write.
    pub async fn refresh(&self) -> Option<StoredValue> {
        self.load().await
    }

    /// Cached value; the default until [`load`](Self::load) completes.
    pub fn value(&self) -> Option<StoredValue> {
        self.state.read().value.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    /// Persist `value`, or remove the key for `None`. The cache is only
    /// updated once the write succeeded.
    pub async fn set(&self, value: Option<StoredValue>) -> Result<()> {
        match &value {
            Some(v) => self.manager.set(&self.key, v, &self.options).await?,
            None => self.manager.remove(&self.key).await?,
        }
        self.state.write().value = value;
        Ok(())
    }

    /// Follow changes to this key on a background task, calling `on_change`
    /// with each decoded value. Removals and values the options reject
    /// report the default instead.
    pub fn watch<F>(&self, on_change: F) -> Result<WatchGuard>
    where
        F: Fn(Option<StoredValue>) + Send + Sync + 'static,
    {
        let stream = match self.sync {
            SyncMode::CrossContext => self.manager.watch(&self.key)?,
            SyncMode::AllContexts => self.manager.watch_all(&self.key)?,
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StateError::Runtime(e.to_string()))?;

        let handle = runtime.spawn(follow(
            stream,
            self.key.clone(),
            self.options.clone(),
            Arc::clone(&self.state),
            on_change,
        ));
        Ok(WatchGuard { handle })
    }
}

async fn follow<F>(
    mut stream: WatchStream,
    key: String,
    options: StorageOptions,
    state: Arc<RwLock<BindingState>>,
    on_change: F,
) where
    F: Fn(Option<StoredValue>) + Send + Sync + 'static,
{
    // Rejected entries are left in place: the writing context owns them, and
    // the next `load` in any context removes them.
    while let Some(event) = stream.recv().await {
        let value = match event.new_value.as_deref() {
            Some(raw) => match options.decode(raw) {
                Ok(value) if options.accepts(&value) => Some(value),
                Ok(_) => {
                    warn!(key = %key, "external change failed validation, using default");
                    options.fallback()
                }
                Err(e) => {
                    warn!(key = %key, "ignoring undecodable change: {e}");
                    continue;
                }
            },
            None => options.fallback(),
        };
        debug!(key = %key, origin = %event.origin, "external change");
        state.write().value = value.clone();
        on_change(value);
    }
}

/// Rust types with a fixed [`StoredValue`] shape.
pub trait StoredType: Sized + Clone + Send + Sync + 'static {
    const KIND: ValueKind;

    fn from_stored(value: &StoredValue) -> Option<Self>;

    fn into_stored(self) -> StoredValue;
}

impl StoredType for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn from_stored(value: &StoredValue) -> Option<Self> {
        value.as_bool()
    }

    fn into_stored(self) -> StoredValue {
        StoredValue::Bool(self)
    }
}

impl StoredType for String {
    const KIND: ValueKind = ValueKind::String;

    fn from_stored(value: &StoredValue) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn into_stored(self) -> StoredValue {
        StoredValue::String(self)
    }
}

impl StoredType for f64 {
    const KIND: ValueKind = ValueKind::Number;

    fn from_stored(value: &StoredValue) -> Option<Self> {
        value.as_f64()
    }

    fn into_stored(self) -> StoredValue {
        StoredValue::from(self)
    }
}

impl StoredType for Vec<StoredValue> {
    const KIND: ValueKind = ValueKind::Array;

    fn from_stored(value: &StoredValue) -> Option<Self> {
        value.as_array().cloned()
    }

    fn into_stored(self) -> StoredValue {
        StoredValue::Array(self)
    }
}

impl StoredType for BTreeMap<String, StoredValue> {
    const KIND: ValueKind = ValueKind::Object;

    fn from_stored(value: &StoredValue) -> Option<Self> {
        value.as_object().cloned()
    }

    fn into_stored(self) -> StoredValue {
        StoredValue::Object(self)
    }
}

/// A binding whose value is never null: absent, removed or mistyped entries
/// read as the default.
pub struct TypedBinding<B: StorageBackend + ?Sized, T: StoredType> {
    inner: StorageBinding<B>,
    default: T,
}

pub type BoolBinding<B> = TypedBinding<B, bool>;
pub type StringBinding<B> = TypedBinding<B, String>;
pub type NumberBinding<B> = TypedBinding<B, f64>;
pub type ArrayBinding<B> = TypedBinding<B, Vec<StoredValue>>;
pub type ObjectBinding<B> = TypedBinding<B, BTreeMap<String, StoredValue>>;

impl<B: StorageBackend + ?Sized, T: StoredType> TypedBinding<B, T> {
    pub fn new(manager: StorageManager<B>, key: impl Into<String>, default: T) -> Self {
        let options = StorageOptions::new()
            .expect_kind(T::KIND)
            .default_value(default.clone().into_stored());
        Self {
            inner: StorageBinding::new(manager, key, options),
            default,
        }
    }

    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.inner = self.inner.with_sync(sync);
        self
    }

    pub async fn load(&self) -> T {
        self.inner.load().await;
        self.value()
    }

    pub fn value(&self) -> T {
        self.inner
            .value()
            .as_ref()
            .and_then(T::from_stored)
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.inner.is_loading()
    }

    pub async fn set(&self, value: T) -> Result<()> {
        self.inner.set(Some(value.into_stored())).await
    }

    /// Remove the entry; the value reads as the default afterwards.
    pub async fn reset(&self) -> Result<()> {
        self.inner.set(None).await
    }

    pub fn watch<F>(&self, on_change: F) -> Result<WatchGuard>
    where
        F: Fn(Option<StoredValue>) + Send + Sync + 'static,
    {
        self.inner.watch(on_change)
    }
}

impl<B: StorageBackend + ?Sized> TypedBinding<B, bool> {
    /// Flip the flag and persist it.
    pub async fn toggle(&self) -> Result<bool> {
        let flipped = !self.value();
        self.set(flipped).await?;
        Ok(flipped)
    }
}

impl<B: StorageBackend + ?Sized> TypedBinding<B, Vec<StoredValue>> {
    /// Append one element. Load-modify-store: not atomic across contexts.
    pub async fn push(&self, item: StoredValue) -> Result<()> {
        let mut items = self.value();
        items.push(item);
        self.set(items).await
    }
}

const EXPIRY_DATA: &str = "data";
const EXPIRY_AT: &str = "expires";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A binding whose entries lapse after a time-to-live.
///
/// Entries are stored as `{data, expires}` with `expires` in epoch
/// milliseconds. Expiry is checked lazily on load; nothing sweeps unread
/// entries.
pub struct ExpiringBinding<B: StorageBackend + ?Sized> {
    manager: StorageManager<B>,
    key: String,
    default: Option<StoredValue>,
    state: RwLock<BindingState>,
}

impl<B: StorageBackend + ?Sized> ExpiringBinding<B> {
    pub fn new(
        manager: StorageManager<B>,
        key: impl Into<String>,
        default: Option<StoredValue>,
    ) -> Self {
        let state = BindingState {
            value: default.clone(),
            loading: true,
        };
        Self {
            manager,
            key: key.into(),
            default,
            state: RwLock::new(state),
        }
    }

    pub async fn load(&self) -> Option<StoredValue> {
        let options = StorageOptions::new().expect_kind(ValueKind::Object);
        let value = match self.manager.get(&self.key, &options).await {
            Some(envelope) => self.unwrap_envelope(envelope).await,
            None => self.default.clone(),
        };

        let mut state = self.state.write();
        state.value = value.clone();
        state.loading = false;
        value
    }

    async fn unwrap_envelope(&self, envelope: StoredValue) -> Option<StoredValue> {
        let expires = envelope.field(EXPIRY_AT).and_then(StoredValue::as_i64);
        let data = envelope.field(EXPIRY_DATA).cloned();

        match (expires, data) {
            (Some(expires), Some(data)) if now_millis() <= expires => Some(data),
            (expires, _) => {
                debug!(key = %self.key, ?expires, "dropping expired entry");
                if let Err(e) = self.manager.remove(&self.key).await {
                    warn!(key = %self.key, "could not remove expired entry: {e}");
                }
                self.default.clone()
            }
        }
    }

    pub fn value(&self) -> Option<StoredValue> {
        self.state.read().value.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().loading
    }

    /// Store `value` for `ttl`; `None` removes the entry.
    pub async fn set(&self, value: Option<StoredValue>, ttl: Duration) -> Result<()> {
        match &value {
            Some(data) => {
                let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                let envelope = StoredValue::object([
                    (EXPIRY_DATA, data.clone()),
                    (EXPIRY_AT, StoredValue::from(now_millis().saturating_add(ttl_ms))),
                ]);
                self.manager
                    .set(&self.key, &envelope, &StorageOptions::new())
                    .await?;
            }
            None => self.manager.remove(&self.key).await?,
        }
        self.state.write().value = value.or_else(|| self.default.clone());
        Ok(())
    }
}

/// A whole form's field map persisted under one key.
pub struct FormBinding<B: StorageBackend + ?Sized> {
    inner: StorageBinding<B>,
    initial: BTreeMap<String, StoredValue>,
}

impl<B: StorageBackend + ?Sized> FormBinding<B> {
    pub fn new(
        manager: StorageManager<B>,
        key: impl Into<String>,
        initial: BTreeMap<String, StoredValue>,
    ) -> Self {
        let options = StorageOptions::new()
            .expect_kind(ValueKind::Object)
            .default_value(StoredValue::Object(initial.clone()));
        Self {
            inner: StorageBinding::new(manager, key, options),
            initial,
        }
    }

    pub async fn load(&self) -> BTreeMap<String, StoredValue> {
        self.inner.load().await;
        self.values()
    }

    pub fn values(&self) -> BTreeMap<String, StoredValue> {
        self.inner
            .value()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_else(|| self.initial.clone())
    }

    pub fn field(&self, name: &str) -> Option<StoredValue> {
        self.values().remove(name)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.is_loading()
    }

    /// Update one field and persist the whole form.
    pub async fn set_field(&self, name: impl Into<String>, value: StoredValue) -> Result<()> {
        let mut values = self.values();
        values.insert(name.into(), value);
        self.inner.set(Some(StoredValue::Object(values))).await
    }

    pub async fn set_values(&self, values: BTreeMap<String, StoredValue>) -> Result<()> {
        self.inner.set(Some(StoredValue::Object(values))).await
    }

    /// Restore and persist the initial values.
    pub async fn reset(&self) -> Result<()> {
        self.inner
            .set(Some(StoredValue::Object(self.initial.clone())))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn manager() -> StorageManager<MemoryBackend> {
        StorageManager::new(Arc::new(MemoryBackend::new()), "pm_").unwrap()
    }

    #[tokio::test]
    async fn test_binding_loads_on_mount() {
        let m = manager();
        m.set("theme", &"dark".into(), &StorageOptions::new()).await.unwrap();

        let binding = StorageBinding::new(m, "theme", StorageOptions::new().default_value("light"));
        assert!(binding.is_loading());
        assert_eq!(binding.value(), Some("light".into()));

        binding.load().await;
        assert!(!binding.is_loading());
        assert_eq!(binding.value(), Some("dark".into()));
    }

    #[tokio::test]
    async fn test_set_none_removes() {
        let m = manager();
        let binding = StorageBinding::new(m.clone(), "draft", StorageOptions::new());
        binding.load().await;

        binding.set(Some("text".into())).await.unwrap();
        assert!(m.has("draft").await);

        binding.set(None).await.unwrap();
        assert!(!m.has("draft").await);
        assert_eq!(binding.value(), None);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache() {
        let m =
            StorageManager::new(Arc::new(MemoryBackend::with_quota(Some(20))), "pm_").unwrap();
        let binding = StorageBinding::new(m, "note", StorageOptions::new());
        binding.set(Some("ok".into())).await.unwrap();

        let err = binding.set(Some("x".repeat(100).into())).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(binding.value(), Some("ok".into()));
    }

    #[tokio::test]
    async fn test_same_context_bindings_are_not_synced() {
        let m = manager();
        let first = StorageBinding::new(m.clone(), "theme", StorageOptions::new());
        let second = StorageBinding::new(m, "theme", StorageOptions::new());
        first.load().await;
        second.load().await;

        first.set(Some("dark".into())).await.unwrap();
        assert_eq!(second.value(), None);
        assert_eq!(second.refresh().await, Some("dark".into()));
    }

    #[tokio::test]
    async fn test_watch_receives_other_context_writes() {
        let tab_a = Arc::new(MemoryBackend::new());
        let tab_b = Arc::new(tab_a.fork_context());
        let watched = StorageBinding::new(
            StorageManager::new(Arc::clone(&tab_a), "pm_").unwrap(),
            "theme",
            StorageOptions::new(),
        );
        let writer = StorageManager::new(tab_b, "pm_").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = watched
            .watch(move |value| {
                let _ = tx.send(value);
            })
            .unwrap();

        writer.set("theme", &"dark".into(), &StorageOptions::new()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some("dark".into()));
        assert_eq!(watched.value(), Some("dark".into()));

        writer.remove("theme").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_applies_kind_check_and_default() {
        let tab_a = Arc::new(MemoryBackend::new());
        let tab_b = Arc::new(tab_a.fork_context());
        let light = StoredValue::object([("theme", StoredValue::from("light"))]);
        let dark = StoredValue::object([("theme", StoredValue::from("dark"))]);
        let watched = StorageBinding::new(
            StorageManager::new(Arc::clone(&tab_a), "pm_").unwrap(),
            "preferences",
            StorageOptions::new()
                .expect_kind(ValueKind::Object)
                .default_value(light.clone()),
        );
        let writer = StorageManager::new(tab_b, "pm_").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = watched
            .watch(move |value| {
                let _ = tx.send(value);
            })
            .unwrap();

        writer.set("preferences", &dark, &StorageOptions::new()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some(dark));

        writer.set("preferences", &"garbage".into(), &StorageOptions::new()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some(light.clone()));
        assert_eq!(watched.value(), Some(light.clone()));
        // The foreign entry is left for the next load to heal.
        assert!(tab_a.contains("pm_preferences").await.unwrap());
        assert_eq!(watched.refresh().await, Some(light.clone()));
        assert!(!tab_a.contains("pm_preferences").await.unwrap());
    }

    #[tokio::test]
    async fn test_watch_removal_falls_back_to_default() {
        let tab_a = Arc::new(MemoryBackend::new());
        let tab_b = Arc::new(tab_a.fork_context());
        let light = StoredValue::object([("theme", StoredValue::from("light"))]);
        let watched = StorageBinding::new(
            StorageManager::new(Arc::clone(&tab_a), "pm_").unwrap(),
            "preferences",
            StorageOptions::new()
                .expect_kind(ValueKind::Object)
                .default_value(light.clone()),
        );
        let writer = StorageManager::new(tab_b, "pm_").unwrap();
        let dark = StoredValue::object([("theme", StoredValue::from("dark"))]);
        writer.set("preferences", &dark, &StorageOptions::new()).await.unwrap();
        assert_eq!(watched.load().await, Some(dark));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = watched
            .watch(move |value| {
                let _ = tx.send(value);
            })
            .unwrap();

        writer.remove("preferences").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some(light.clone()));
        assert_eq!(watched.value(), Some(light));
    }

    #[tokio::test]
    async fn test_cross_context_watch_ignores_own_writes() {
        let m = manager();
        let watcher = StorageBinding::new(m.clone(), "theme", StorageOptions::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&seen);
        let _guard = watcher
            .watch(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        m.set("theme", &"dark".into(), &StorageOptions::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_contexts_sync_closes_same_context_gap() {
        let m = manager();
        let follower = StorageBinding::new(m.clone(), "theme", StorageOptions::new())
            .with_sync(SyncMode::AllContexts);
        let leader = StorageBinding::new(m, "theme", StorageOptions::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = follower
            .watch(move |value| {
                let _ = tx.send(value);
            })
            .unwrap();

        leader.set(Some("dark".into())).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Some("dark".into()));
        assert_eq!(follower.value(), Some("dark".into()));
    }

    #[tokio::test]
    async fn test_typed_binding_defaults_and_rejects_wrong_kind() {
        let m = manager();
        m.set("sidebar_open", &"yes".into(), &StorageOptions::new()).await.unwrap();

        let flag: BoolBinding<MemoryBackend> = TypedBinding::new(m.clone(), "sidebar_open", true);
        assert!(flag.load().await);
        assert!(!m.has("sidebar_open").await);

        assert!(!flag.toggle().await.unwrap());
        assert_eq!(
            m.get("sidebar_open", &StorageOptions::new()).await,
            Some(false.into())
        );
    }

    #[tokio::test]
    async fn test_typed_number_and_string() {
        let m = manager();
        let page: NumberBinding<MemoryBackend> = TypedBinding::new(m.clone(), "page", 1.0);
        let search: StringBinding<MemoryBackend> =
            TypedBinding::new(m.clone(), "search", String::new());

        assert_eq!(page.load().await, 1.0);
        page.set(3.0).await.unwrap();
        search.set("oak street".to_string()).await.unwrap();

        let reloaded: NumberBinding<MemoryBackend> = TypedBinding::new(m.clone(), "page", 1.0);
        assert_eq!(reloaded.load().await, 3.0);
        assert_eq!(search.value(), "oak street");

        page.reset().await.unwrap();
        assert_eq!(page.value(), 1.0);
    }

    #[tokio::test]
    async fn test_array_push_and_object_binding() {
        let m = manager();
        let recent: ArrayBinding<MemoryBackend> = TypedBinding::new(m.clone(), "recent", Vec::new());
        recent.load().await;
        recent.push("property-1".into()).await.unwrap();
        recent.push("property-2".into()).await.unwrap();
        assert_eq!(recent.value().len(), 2);

        let settings: ObjectBinding<MemoryBackend> =
            TypedBinding::new(m, "settings", BTreeMap::new());
        assert!(settings.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_expiring_entry_lapses() {
        let m = manager();
        let cached = ExpiringBinding::new(m.clone(), "listing_cache", Some("empty".into()));

        cached
            .set(Some("fresh".into()), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(cached.load().await, Some("empty".into()));
        assert!(!m.has("listing_cache").await);
    }

    #[tokio::test]
    async fn test_expiring_entry_within_ttl() {
        let m = manager();
        let cached = ExpiringBinding::new(m.clone(), "token", None);
        cached
            .set(Some("abc".into()), Duration::from_secs(60))
            .await
            .unwrap();

        let reader = ExpiringBinding::new(m, "token", None);
        assert!(reader.is_loading());
        assert_eq!(reader.load().await, Some("abc".into()));
    }

    #[tokio::test]
    async fn test_expiring_malformed_envelope_removed() {
        let m = manager();
        m.set(
            "token",
            &StoredValue::object([("data", StoredValue::from("abc"))]),
            &StorageOptions::new(),
        )
        .await
        .unwrap();

        let reader = ExpiringBinding::new(m.clone(), "token", None);
        assert_eq!(reader.load().await, None);
        assert!(!m.has("token").await);
    }

    #[tokio::test]
    async fn test_form_binding_fields_and_reset() {
        let m = manager();
        let initial = BTreeMap::from([
            ("name".to_string(), StoredValue::from("")),
            ("units".to_string(), StoredValue::from(1i64)),
        ]);
        let form = FormBinding::new(m.clone(), "property_form", initial.clone());
        assert_eq!(form.load().await, initial);

        form.set_field("name", "Maple Court".into()).await.unwrap();
        let restored = FormBinding::new(m, "property_form", initial.clone());
        restored.load().await;
        assert_eq!(restored.field("name"), Some("Maple Court".into()));
        assert_eq!(restored.field("units"), Some(1i64.into()));

        restored.reset().await.unwrap();
        assert_eq!(restored.values(), initial);
    }

    #[test]
    fn test_watch_outside_runtime_is_an_error() {
        let binding = StorageBinding::new(manager(), "theme", StorageOptions::new());
        let err = binding.watch(|_| {}).unwrap_err();
        assert!(matches!(err, StateError::Runtime(_)));
    }
}
