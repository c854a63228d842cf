//! SQLite implementation of the KvStore trait.
//!
//! This is the primary storage backend for feedmarket. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{KvStore, PutResult};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Collect `(key, value)` rows from a prepared query.
fn collect_entries(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<(String, Vec<u8>)>> {
    let rows = stmt
        .query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();

        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = key.to_string();
        let value = value.to_vec();

        self.with_conn(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO kv (key, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<PutResult> {
        let key = key.to_string();
        let value = value.to_vec();

        self.with_conn(move |conn| {
            let now = now_millis();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO kv (key, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                params![key, value, now],
            )?;

            if inserted == 1 {
                return Ok(PutResult::Inserted);
            }

            // The connection lock is still held, so the row cannot change under us.
            let existing: Vec<u8> =
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })?;
            Ok(PutResult::AlreadyExists(existing))
        })
        .await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = prefix.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            collect_entries(&mut stmt, params![prefix])
        })
        .await
    }

    async fn scan_after(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let prefix = prefix.to_string();
        let after = after.map(str::to_string);
        let limit = limit as i64;

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM kv
                 WHERE substr(key, 1, length(?1)) = ?1
                   AND (?2 IS NULL OR key > ?2)
                 ORDER BY key
                 LIMIT ?3",
            )?;
            collect_entries(&mut stmt, params![prefix, after, limit])
        })
        .await
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::KvStoreExt;
    use feedmarket_core::{keys, Keypair, KeyPairRecord};

    #[tokio::test]
    async fn test_put_and_get() {
        let store = SqliteStore::open_memory().unwrap();

        store.put("a", b"one").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get("b").await.unwrap(), None);

        store.put("a", b"two").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let store = SqliteStore::open_memory().unwrap();

        let r1 = store.put_if_absent("k", b"first").await.unwrap();
        assert_eq!(r1, PutResult::Inserted);

        let r2 = store.put_if_absent("k", b"second").await.unwrap();
        assert_eq!(r2, PutResult::AlreadyExists(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_prefix_scan_and_cursor() {
        let store = SqliteStore::open_memory().unwrap();
        for i in 0..5u8 {
            store.put(&format!("sales/{:02}", i), &[i]).await.unwrap();
        }
        store.put("salesman", b"not a sale").await.unwrap();
        store.put("identity/sales/00", b"identity").await.unwrap();

        let listed = store.list_prefix("sales/").await.unwrap();
        assert_eq!(listed.len(), 5);

        let page = store.scan_after("sales/", Some("sales/01"), 2).await.unwrap();
        let keys: Vec<_> = page.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["sales/02", "sales/03"]);

        let all = store.iter_prefix("sales/").collect_all().await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.db");
        let keypair = Keypair::generate();

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put_record(&keys::market_identity(), &KeyPairRecord::from_keypair(&keypair))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let record: KeyPairRecord = store
            .get_record(&keys::market_identity())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.to_keypair().unwrap(), keypair);
    }
}
