//! # pm-state
//!
//! Client-side state storage for the property-management dashboard.
//!
//! The crate wraps a Web-Storage-shaped key/value backend with:
//!
//! - **A codec** that round-trips JSON plus big integers, dates, maps and sets
//! - **Namespaced managers**: every key lives under a prefix, `clear()` never
//!   reaches outside it
//! - **Validation and migration** on read, with self-healing of bad entries
//! - **Reactive bindings** with cross-context change notification, expiring
//!   entries and persisted form drafts
//! - **A form validator** for required/length/pattern/custom rules
//!
//! ## Backends
//!
//! - [`SqliteBackend`]: durable, survives restarts (the `localStorage` role)
//! - [`MemoryBackend`]: session-scoped (the `sessionStorage` role)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pm_state::{MemoryBackend, StorageManager, StorageOptions, StoredValue};
//!
//! #[tokio::main]
//! async fn main() -> pm_state::Result<()> {
//!     let manager = StorageManager::new(Arc::new(MemoryBackend::new()), "pm_")?;
//!
//!     let prefs = StoredValue::object([("theme", StoredValue::from("dark"))]);
//!     manager.set("preferences", &prefs, &StorageOptions::new()).await?;
//!
//!     let loaded = manager.get("preferences", &StorageOptions::new()).await;
//!     assert_eq!(loaded, Some(prefs));
//!     Ok(())
//! }
//! ```
//!
//! ## Versioned entries
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pm_state::{MemoryBackend, StorageManager, StorageOptions, StoredValue};
//!
//! #[tokio::main]
//! async fn main() -> pm_state::Result<()> {
//!     let manager = StorageManager::new(Arc::new(MemoryBackend::new()), "pm_")?;
//!
//!     let options = StorageOptions::new().version(2).migrate(|old, _from| {
//!         // v1 stored a bare theme name, v2 stores an object.
//!         Ok(StoredValue::object([("theme", old)]))
//!     });
//!     let prefs = manager.get("preferences", &options).await;
//!     println!("{:?}", prefs);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod binding;
pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod sqlite;
pub mod validation;
pub mod watch;

// Re-export main types
pub use backend::{QuotaEstimate, StorageBackend, MAX_KEY_LENGTH};
pub use binding::{
    ArrayBinding, BoolBinding, ExpiringBinding, FormBinding, NumberBinding, ObjectBinding,
    StorageBinding, StoredType, StringBinding, SyncMode, TypedBinding, WatchGuard,
};
pub use codec::{decode, encode, StoredValue, ValueKind};
pub use config::StorageConfig;
pub use error::{Result, StateError};
pub use manager::{StorageInfo, StorageManager, StorageOptions, StorageService};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use validation::{FieldRules, FormValidationConfig, FormValidator, Rule, ValidationError};
pub use watch::{ContextId, EventKind, StorageEvent, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backend::StorageBackend;
    pub use crate::binding::{StorageBinding, SyncMode, TypedBinding};
    pub use crate::codec::{StoredValue, ValueKind};
    pub use crate::error::{Result, StateError};
    pub use crate::manager::{StorageManager, StorageOptions};
    pub use crate::memory::MemoryBackend;
    pub use crate::sqlite::SqliteBackend;
    pub use crate::validation::{FieldRules, FormValidationConfig, FormValidator};
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn memory_manager(prefix: &str) -> StorageManager<MemoryBackend> {
        StorageManager::new(Arc::new(MemoryBackend::new()), prefix).unwrap()
    }

    #[tokio::test]
    async fn test_preferences_lifecycle() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let m = memory_manager("pm_");
        let dark = StoredValue::object([("theme", StoredValue::from("dark"))]);
        let light = StoredValue::object([("theme", StoredValue::from("light"))]);

        m.set("preferences", &dark, &StorageOptions::new()).await.unwrap();
        assert_eq!(m.get("preferences", &StorageOptions::new()).await, Some(dark));

        m.clear().await.unwrap();
        let opts = StorageOptions::new().default_value(light.clone());
        assert_eq!(m.get("preferences", &opts).await, Some(light));
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let backend = Arc::new(MemoryBackend::new());
        let m1 = StorageManager::new(Arc::clone(&backend), "p1_").unwrap();
        let m2 = StorageManager::new(Arc::clone(&backend), "p2_").unwrap();

        m1.set("a", &"1".into(), &StorageOptions::new()).await.unwrap();
        m1.set("b", &"2".into(), &StorageOptions::new()).await.unwrap();
        m2.set("a", &"other".into(), &StorageOptions::new()).await.unwrap();
        m2.clear().await.unwrap();

        assert!(m1.has("a").await);
        assert!(m1.has("b").await);
        assert!(!m2.has("a").await);
    }

    #[tokio::test]
    async fn test_nested_extended_values_persist() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let m = StorageManager::new(Arc::new(backend), "pm_").unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();

        let schedule = StoredValue::object([
            (
                "inspections",
                StoredValue::map([(StoredValue::from("unit-1"), StoredValue::date(at))]),
            ),
            ("ledger_total", StoredValue::BigInt(900_719_925_474_099_300)),
            (
                "assigned",
                StoredValue::set([StoredValue::from("ops"), StoredValue::from("maint")]),
            ),
        ]);

        m.set("schedule", &schedule, &StorageOptions::new()).await.unwrap();
        assert_eq!(m.get("schedule", &StorageOptions::new()).await, Some(schedule));
    }

    #[tokio::test]
    async fn test_validation_self_heal_on_durable_backend() {
        let backend = Arc::new(SqliteBackend::in_memory().await.unwrap());
        let m = StorageManager::new(Arc::clone(&backend), "pm_").unwrap();
        backend.set_item("pm_filters", "\"raw string\"").await.unwrap();

        let opts = StorageOptions::new().expect_kind(ValueKind::Object);
        assert_eq!(m.get("filters", &opts).await, None);
        assert!(backend.get_item("pm_filters").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_draft_form_survives_reload() {
        let m = memory_manager("pm_");
        let config = || {
            FormValidationConfig::new()
                .field("title", FieldRules::new().required().min_length(5))
                .field("priority", FieldRules::new().required())
        };

        let mut validator = FormValidator::new(config(), BTreeMap::new());
        validator.set_value("title", "Leak", true);
        validator.set_value("priority", "high", true);
        assert!(!validator.is_form_valid());

        let draft = FormBinding::new(m.clone(), "maintenance_draft", BTreeMap::new());
        draft.set_values(validator.stored_values()).await.unwrap();

        let reopened = FormBinding::new(m, "maintenance_draft", BTreeMap::new());
        let mut restored = FormValidator::new(config(), BTreeMap::new());
        restored.restore_values(&reopened.load().await);
        assert_eq!(restored.value("title"), Some("Leak"));
        assert!(!restored.validate_form());
        assert_eq!(
            restored.error("title"),
            Some("title must be at least 5 characters")
        );
    }

    #[tokio::test]
    async fn test_expiring_session_entry() {
        let service = StorageService::open(&StorageConfig::default()).await.unwrap();
        let banner = ExpiringBinding::new(service.session.clone(), "banner_dismissed", None);

        banner
            .set(Some(true.into()), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(banner.load().await, None);
        assert!(!service.session.has("banner_dismissed").await);
    }

    #[tokio::test]
    async fn test_backends_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        assert_send_sync::<MemoryBackend>();
        assert_send_sync::<SqliteBackend>();
        assert_send_sync::<StorageManager<dyn StorageBackend>>();
    }
}
