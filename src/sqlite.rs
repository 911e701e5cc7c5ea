//! SQLite storage backend.
//!
//! Durable scope: entries survive restarts of the process that owns the
//! file. Features:
//! - WAL mode for concurrent readers
//! - Insertion-ordered enumeration (a key keeps its position when overwritten)
//! - Optional quota, checked inside the write transaction
//! - Watch via in-memory channels (per-process)

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::{code_units, validate_key, QuotaEstimate, StorageBackend};
use crate::error::{Result, StateError};
use crate::watch::{ContextId, StorageEvent, WatchSender, WatchStream};

/// SQLite implementation of StorageBackend.
///
/// Watch notifications are in-process only (not shared across processes).
pub struct SqliteBackend {
    pool: SqlitePool,
    watcher: WatchSender,
    quota: Option<u64>,
    context: ContextId,
}

impl SqliteBackend {
    /// Open or create a SQLite backend at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite backend at {:?}", path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StateError::ConnectionError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StateError::ConnectionError(e.to_string()))?;

        Self::from_pool(pool).await
    }

    /// Create an in-memory SQLite backend (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StateError::ConnectionError(e.to_string()))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // A single connection that never recycles: the database lives inside it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StateError::ConnectionError(e.to_string()))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let backend = Self {
            pool,
            watcher: WatchSender::new(1024),
            quota: None,
            context: ContextId::next(),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Reject writes once `quota` code units are used.
    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    /// Replace the change channel with one of the given capacity.
    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        self.watcher = WatchSender::new(capacity);
        self
    }

    /// A new handle over the same database, writing as a different context.
    pub fn fork_context(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            watcher: self.watcher.clone(),
            quota: self.quota,
            context: ContextId::next(),
        }
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS web_storage (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                units INTEGER NOT NULL,
                seq INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_web_storage_seq ON web_storage(seq);
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;

        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM web_storage WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;

        let units = (code_units(key) + code_units(value)) as i64;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String, i64)> =
            sqlx::query_as("SELECT value, units FROM web_storage WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(quota) = self.quota {
            let (used,): (i64,) = sqlx::query_as("SELECT COALESCE(SUM(units), 0) FROM web_storage")
                .fetch_one(&mut *tx)
                .await?;
            let replaced = existing.as_ref().map(|(_, u)| *u).unwrap_or(0);
            let projected = (used - replaced + units) as u64;
            if projected > quota {
                return Err(StateError::StorageFull(format!(
                    "writing {key} needs {projected} of {quota} code units"
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO web_storage (key, value, units, seq)
            VALUES (?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM web_storage))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                units = excluded.units
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(units)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(key, context = %self.context, "sqlite set");
        self.watcher.send(StorageEvent::set(
            key,
            existing.map(|(old, _)| old),
            value.to_string(),
            self.context,
        ));
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let removed: Option<(String,)> =
            sqlx::query_as("DELETE FROM web_storage WHERE key = ? RETURNING value")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((old,)) = removed {
            self.watcher
                .send(StorageEvent::removed(key, old, self.context));
        }
        Ok(())
    }

    async fn key(&self, index: usize) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT key FROM web_storage ORDER BY seq LIMIT 1 OFFSET ?")
                .bind(index as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(k,)| k))
    }

    async fn length(&self) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM web_storage")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
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
        let row: std::result::Result<(i64,), sqlx::Error> =
            sqlx::query_as("SELECT COALESCE(SUM(units), 0) FROM web_storage")
                .fetch_one(&self.pool)
                .await;
        match row {
            Ok((usage,)) => Some(QuotaEstimate {
                quota: self.quota,
                usage: usage as u64,
            }),
            Err(e) => {
                debug!("quota estimate unavailable: {e}");
                None
            }
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        // substr avoids LIKE treating `_` and `%` in the prefix as wildcards.
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM web_storage WHERE substr(key, 1, length(?1)) = ?1 ORDER BY seq",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_set_and_get() {
        let backend = SqliteBackend::in_memory().await.unwrap();

        backend.set_item("pm_theme", "\"dark\"").await.unwrap();
        let value = backend.get_item("pm_theme").await.unwrap();
        assert_eq!(value.as_deref(), Some("\"dark\""));
    }

    #[tokio::test]
    async fn test_sqlite_overwrite_keeps_position() {
        let backend = SqliteBackend::in_memory().await.unwrap();

        backend.set_item("first", "1").await.unwrap();
        backend.set_item("second", "2").await.unwrap();
        backend.set_item("first", "3").await.unwrap();

        assert_eq!(backend.length().await.unwrap(), 2);
        assert_eq!(backend.key(0).await.unwrap().as_deref(), Some("first"));
        assert_eq!(backend.key(1).await.unwrap().as_deref(), Some("second"));
        assert_eq!(backend.get_item("first").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_sqlite_remove() {
        let backend = SqliteBackend::in_memory().await.unwrap();

        backend.set_item("k", "v").await.unwrap();
        assert!(backend.contains("k").await.unwrap());

        backend.remove_item("k").await.unwrap();
        backend.remove_item("k").await.unwrap();
        assert!(!backend.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_prefix_is_literal() {
        let backend = SqliteBackend::in_memory().await.unwrap();

        backend.set_item("pm_a", "1").await.unwrap();
        backend.set_item("pmXa", "2").await.unwrap();

        let keys = backend.keys_with_prefix("pm_").await.unwrap();
        assert_eq!(keys, vec!["pm_a".to_string()]);
    }

    #[tokio::test]
    async fn test_sqlite_quota() {
        let backend = SqliteBackend::in_memory()
            .await
            .unwrap()
            .with_quota(Some(8));

        backend.set_item("a", "1234").await.unwrap();
        let err = backend.set_item("b", "12345").await.unwrap_err();
        assert!(matches!(err, StateError::StorageFull(_)));

        let estimate = backend.estimate().await.unwrap();
        assert_eq!(estimate.usage, 5);
    }

    #[tokio::test]
    async fn test_sqlite_durable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let backend = SqliteBackend::open(&path).await.unwrap();
            backend.set_item("pm_preferences", "{\"theme\":\"dark\"}").await.unwrap();
            backend.close().await;
        }

        let reopened = SqliteBackend::open(&path).await.unwrap();
        let value = reopened.get_item("pm_preferences").await.unwrap();
        assert_eq!(value.as_deref(), Some("{\"theme\":\"dark\"}"));
    }

    #[tokio::test]
    async fn test_sqlite_cross_context_event() {
        let tab_a = SqliteBackend::in_memory().await.unwrap();
        let tab_b = tab_a.fork_context();
        let mut stream = tab_a.watch("pm_theme").unwrap();

        tab_b.set_item("pm_theme", "\"light\"").await.unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.origin, tab_b.context());
        assert_eq!(event.new_value.as_deref(), Some("\"light\""));
    }
}
