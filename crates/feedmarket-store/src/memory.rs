//! In-memory implementation of the KvStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::{KvStore, PutResult};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<PutResult> {
        let mut entries = self.write()?;

        if let Some(existing) = entries.get(key) {
            return Ok(PutResult::AlreadyExists(existing.clone()));
        }

        entries.insert(key.to_string(), value.to_vec());
        Ok(PutResult::Inserted)
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.read()?;

        Ok(entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn scan_after(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let entries = self.read()?;

        let start = match after {
            Some(after) if after >= prefix => Bound::Excluded(after),
            _ => Bound::Included(prefix),
        };

        Ok(entries
            .range::<str, _>((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::KvStoreExt;
    use feedmarket_core::{BuyRecord, Ed25519PublicKey};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();

        assert_eq!(store.get("a").await.unwrap(), None);
        store.put("a", b"one").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"one".to_vec()));

        store.put("a", b"two").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_put_if_absent_keeps_first_value() {
        let store = MemoryStore::new();

        let r1 = store.put_if_absent("k", b"first").await.unwrap();
        assert_eq!(r1, PutResult::Inserted);

        let r2 = store.put_if_absent("k", b"second").await.unwrap();
        assert_eq!(r2, PutResult::AlreadyExists(b"first".to_vec()));
        assert_eq!(store.get("k").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_list_prefix_excludes_neighbours() {
        let store = MemoryStore::new();
        store.put("buys/feeds/aa", b"1").await.unwrap();
        store.put("buys/feeds/bb", b"2").await.unwrap();
        store.put("buys/other", b"3").await.unwrap();
        store.put("sales/aa", b"4").await.unwrap();

        let keys: Vec<String> = store
            .list_prefix("buys/feeds/")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["buys/feeds/aa", "buys/feeds/bb"]);
    }

    #[tokio::test]
    async fn test_cursor_pages_through_prefix() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.put(&format!("p/{:02}", i), &[i]).await.unwrap();
        }
        store.put("q/00", b"x").await.unwrap();

        let mut cursor = crate::traits::PrefixCursor::new(&store, "p/", 3);
        let mut seen = Vec::new();
        while let Some((key, value)) = cursor.next_entry().await.unwrap() {
            assert_eq!(key, format!("p/{:02}", value[0]));
            seen.push(value[0]);
        }
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_racing_get_or_insert_converges() {
        let store = Arc::new(MemoryStore::new());
        let seller = Ed25519PublicKey::from_bytes([1; 32]);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .get_or_insert_record("buys/feeds/x", || BuyRecord {
                        seller,
                        feed: Ed25519PublicKey::from_bytes([i; 32]),
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));

        let stored: BuyRecord = store.get_record("buys/feeds/x").await.unwrap().unwrap();
        assert_eq!(stored, results[0]);
    }

    proptest::proptest! {
        #[test]
        fn cursor_agrees_with_list_prefix(
            keys in proptest::collection::btree_set("[ab]/[a-z]{1,4}", 0..40),
            batch_size in 1usize..8,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (paged, listed) = rt.block_on(async {
                let store = MemoryStore::new();
                for key in &keys {
                    store.put(key, key.as_bytes()).await.unwrap();
                }
                let paged = crate::traits::PrefixCursor::new(&store, "a/", batch_size)
                    .collect_all()
                    .await
                    .unwrap();
                (paged, store.list_prefix("a/").await.unwrap())
            });
            proptest::prop_assert_eq!(paged, listed);
        }
    }
}
