//! KvStore trait: the abstract interface for record persistence.
//!
//! This trait allows markets to be storage-agnostic. Implementations
//! include SQLite (primary) and in-memory (for tests).

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use feedmarket_core::{decode_record, encode_record};

use crate::error::Result;

/// Default number of entries a [`PrefixCursor`] fetches per round trip.
pub const DEFAULT_CURSOR_BATCH: usize = 64;

/// Result of a create-if-absent write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutResult {
    /// The value was written.
    Inserted,
    /// A value already existed and was left untouched (idempotent - not an error).
    AlreadyExists(Vec<u8>),
}

/// The KvStore trait: async interface for key-value persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, we use `spawn_blocking` internally to avoid blocking the runtime.
///
/// # Design Notes
///
/// - **Read-after-write**: once `put` or `put_if_absent` returns, every later
///   `get` for that key observes the write.
/// - **Create-if-absent**: `put_if_absent` is atomic per key. Two racing first
///   writers cannot both see `Inserted`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Store `value` under `key` only if the key is absent.
    ///
    /// # Returns
    /// - `Inserted` if the value was written.
    /// - `AlreadyExists` with the stored value otherwise.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<PutResult>;

    /// List every entry whose key starts with `prefix`, ordered by key.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// List up to `limit` entries under `prefix` with keys strictly after `after`.
    ///
    /// Backs [`PrefixCursor`]; ordered by key.
    async fn scan_after(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>>;
}

/// Typed record helpers for any [`KvStore`].
pub trait KvStoreExt: KvStore {
    /// Get and decode a record.
    fn get_record<T>(&self, key: &str) -> impl std::future::Future<Output = Result<Option<T>>> + Send
    where
        T: DeserializeOwned + Send;

    /// Encode and store a record, replacing any previous value.
    fn put_record<T>(&self, key: &str, record: &T) -> impl std::future::Future<Output = Result<()>> + Send
    where
        T: Serialize + Sync;

    /// Encode and store a record only if the key is absent.
    ///
    /// Returns `true` if this call wrote the record.
    fn put_record_if_absent<T>(
        &self,
        key: &str,
        record: &T,
    ) -> impl std::future::Future<Output = Result<bool>> + Send
    where
        T: Serialize + Sync;

    /// Return the stored record, creating it with `make` if absent.
    ///
    /// Racing callers converge on the first record written.
    fn get_or_insert_record<T, F>(
        &self,
        key: &str,
        make: F,
    ) -> impl std::future::Future<Output = Result<T>> + Send
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> T + Send;

    /// Iterate a key prefix in batches.
    fn iter_prefix(&self, prefix: &str) -> PrefixCursor<'_, Self> {
        PrefixCursor::new(self, prefix, DEFAULT_CURSOR_BATCH)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {
    async fn get_record<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_record<T>(&self, key: &str, record: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let bytes = encode_record(record)?;
        self.put(key, &bytes).await
    }

    async fn put_record_if_absent<T>(&self, key: &str, record: &T) -> Result<bool>
    where
        T: Serialize + Sync,
    {
        let bytes = encode_record(record)?;
        let result = self.put_if_absent(key, &bytes).await?;
        Ok(matches!(result, PutResult::Inserted))
    }

    async fn get_or_insert_record<T, F>(&self, key: &str, make: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> T + Send,
    {
        if let Some(existing) = self.get_record(key).await? {
            return Ok(existing);
        }

        let record = make();
        let bytes = encode_record(&record)?;
        match self.put_if_absent(key, &bytes).await? {
            PutResult::Inserted => Ok(record),
            // Lost the race: the first writer's record wins.
            PutResult::AlreadyExists(existing) => Ok(decode_record(&existing)?),
        }
    }
}

/// Batched cursor over every entry under a key prefix.
///
/// Fetches `batch_size` entries at a time through [`KvStore::scan_after`], so
/// large namespaces are never loaded in one piece.
pub struct PrefixCursor<'a, S: KvStore + ?Sized> {
    store: &'a S,
    prefix: String,
    last_key: Option<String>,
    buffer: VecDeque<(String, Vec<u8>)>,
    batch_size: usize,
    exhausted: bool,
}

impl<'a, S: KvStore + ?Sized> PrefixCursor<'a, S> {
    /// Create a cursor. A zero batch size is treated as one.
    pub fn new(store: &'a S, prefix: &str, batch_size: usize) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            last_key: None,
            buffer: VecDeque::new(),
            batch_size: batch_size.max(1),
            exhausted: false,
        }
    }

    /// Fetch the next entry, or `None` once the prefix is exhausted.
    pub async fn next_entry(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        if self.buffer.is_empty() && !self.exhausted {
            let batch = self
                .store
                .scan_after(&self.prefix, self.last_key.as_deref(), self.batch_size)
                .await?;

            if batch.len() < self.batch_size {
                self.exhausted = true;
            }
            if let Some((key, _)) = batch.last() {
                self.last_key = Some(key.clone());
            }
            self.buffer.extend(batch);
        }

        Ok(self.buffer.pop_front())
    }

    /// Drain the remaining entries.
    pub async fn collect_all(mut self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}
