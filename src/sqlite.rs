//! SQLite key/value store.
//!
//! An embedded, durable backend for single-host deployments:
//! - WAL mode for concurrent readers
//! - Prefix scans via `instr`, so `_` and `%` in keys are literal
//! - Watch via in-memory channels (per-process), sent in commit order

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::store::{validate_key, KvStore};
use crate::watch::{WatchEvent, WatchSender, WatchStream};

/// SQLite implementation of [`KvStore`].
///
/// Watch notifications are in-process only (not shared across processes).
/// Writes hold `write_lock` until their events are sent, so subscribers
/// observe them in commit order.
pub struct SqliteStore {
    pool: SqlitePool,
    watcher: WatchSender,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open or create a SQLite store at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening SQLite config store");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| ConfigError::ConnectionError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| ConfigError::ConnectionError(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ConfigError::ConnectionError(e.to_string()))?;

        // A single connection: every connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| ConfigError::ConnectionError(e.to_string()))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            watcher: WatchSender::new(1024),
            write_lock: Mutex::new(()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config_kv (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_key(key)?;

        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<BTreeMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM config_kv WHERE instr(key, ?) = 1 ORDER BY key")
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO config_kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::now_unix())
        .execute(&self.pool)
        .await?;

        self.watcher.send(WatchEvent::put(key, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM config_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.watcher.send(WatchEvent::delete(key));
        }
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM config_kv WHERE instr(key, ?) = 1 ORDER BY key")
                .bind(prefix)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM config_kv WHERE instr(key, ?) = 1")
            .bind(prefix)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // Send events after successful commit
        for (key,) in rows {
            self.watcher.send(WatchEvent::delete(key));
        }
        Ok(())
    }

    fn watch(&self, prefix: &str) -> Result<WatchStream> {
        Ok(self.watcher.subscribe(prefix))
    }
}
