//! SQLite-backed session store.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{DEFAULT_SWEEP_INTERVAL, SessionStore, StoreOptions};
use crate::error::{Error, Result};
use crate::options::MaxAge;
use crate::session::now_millis;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS sessions (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
)";

/// Session store persisted in a SQLite table.
///
/// Thread-safe via internal Mutex. All operations acquire the lock.
/// Expired rows are deleted when read and swept from `set` at most once per
/// sweep interval.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    sweep_interval_ms: i64,
    last_sweep_ms: AtomicI64,
}

impl SqliteStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::Database)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::Database)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            sweep_interval_ms: duration_millis(DEFAULT_SWEEP_INTERVAL),
            last_sweep_ms: AtomicI64::new(now_millis()),
        })
    }

    /// Sweep expired rows at most once per `interval`
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = duration_millis(interval);
        self
    }

    fn sweep_due(&self, now: i64) -> bool {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        now.saturating_sub(last) >= self.sweep_interval_ms
    }

    /// Delete expired rows, returning how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let removed = conn.execute(
            "DELETE FROM sessions WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(removed)
    }

    /// Number of stored rows
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, key: &str, _max_age: MaxAge, _opts: StoreOptions) -> Result<Option<Value>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        let row: Option<(String, Option<i64>)> = conn
            .query_row(
                "SELECT value, expires_at FROM sessions WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((text, expires_at)) = row else {
            return Ok(None);
        };

        if expires_at.is_some_and(|at| at <= now_millis()) {
            conn.execute("DELETE FROM sessions WHERE key = ?1", params![key])?;
            return Ok(None);
        }

        // A row we cannot parse is treated like a miss
        Ok(serde_json::from_str(&text).ok())
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        max_age: MaxAge,
        _opts: StoreOptions,
    ) -> Result<String> {
        let text = serde_json::to_string(&value)?;
        let now = now_millis();
        let expires_at = max_age
            .as_millis()
            .map(|ms| now.saturating_add(i64::try_from(ms).unwrap_or(i64::MAX)));

        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        if self.sweep_due(now) {
            let removed = conn.execute(
                "DELETE FROM sessions WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?;
            self.last_sweep_ms.store(now, Ordering::Relaxed);
            if removed > 0 {
                debug!(removed, "swept expired sessions");
            }
        }
        conn.execute(
            "INSERT INTO sessions (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, text, expires_at],
        )?;
        Ok(key.to_string())
    }

    async fn destroy(&self, key: &str, _opts: StoreOptions) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        conn.execute("DELETE FROM sessions WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set("k1", json!({"user": "alice"}), MaxAge::ONE_DAY, StoreOptions::default())
            .await
            .unwrap();

        let value = store
            .get("k1", MaxAge::ONE_DAY, StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(value, Some(json!({"user": "alice"})));

        // Upsert replaces
        store
            .set("k1", json!({"user": "bob"}), MaxAge::ONE_DAY, StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_destroy() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set("k1", json!({}), MaxAge::Session, StoreOptions::default())
            .await
            .unwrap();
        store.destroy("k1", StoreOptions::default()).await.unwrap();

        let value = store
            .get("k1", MaxAge::Session, StoreOptions::default())
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_store_expiry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let short = MaxAge::Duration(Duration::from_millis(10));
        store
            .set("k1", json!({"a": 1}), short, StoreOptions::default())
            .await
            .unwrap();
        store
            .set("k2", json!({"b": 2}), short, StoreOptions::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("k1", short, StoreOptions::default()).await.unwrap().is_none());
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_store_set_sweeps_unread_rows() {
        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_sweep_interval(Duration::from_millis(10));
        let short = MaxAge::Duration(Duration::from_millis(10));
        store
            .set("abandoned", json!({}), short, StoreOptions::default())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        store
            .set("fresh", json!({}), MaxAge::ONE_DAY, StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);

        // Default interval keeps later writes from sweeping again right away
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set("k1", json!({}), short, StoreOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        store
            .set("k2", json!({}), MaxAge::ONE_DAY, StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_store_huge_ttl() {
        let store = SqliteStore::open_in_memory().unwrap();
        let huge = MaxAge::from_millis(u64::MAX).with_grace(crate::store::STORE_TTL_GRACE);
        store
            .set("k1", json!({"a": 1}), huge, StoreOptions::default())
            .await
            .unwrap();

        let value = store.get("k1", huge, StoreOptions::default()).await.unwrap();
        assert_eq!(value, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_sqlite_store_file_persists() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("sessions.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .set("k1", json!({"n": 7}), MaxAge::ONE_DAY, StoreOptions::default())
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let value = store
            .get("k1", MaxAge::ONE_DAY, StoreOptions::default())
            .await
            .unwrap();
        assert_eq!(value, Some(json!({"n": 7})));
    }
}
