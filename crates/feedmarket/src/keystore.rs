//! Persistent identity key pairs.

use std::sync::Arc;

use tracing::debug;

use feedmarket_core::{KeyPairRecord, Keypair};
use feedmarket_store::{KvStore, KvStoreExt, StoreError};

use crate::error::{MarketError, Result};

/// Get-or-create access to identity key pairs stored under stable record keys.
///
/// A key pair is generated at most once per record key for the lifetime of
/// the store. Racing first callers converge on whichever record landed first.
#[derive(Clone)]
pub struct KeyStore {
    store: Arc<dyn KvStore>,
}

impl KeyStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Load the key pair stored under `record_key`, generating and persisting
    /// one first if absent.
    ///
    /// The returned key pair is always the persisted one.
    pub async fn get_or_create(&self, record_key: &str) -> Result<Keypair> {
        let load = async {
            let record: KeyPairRecord = self
                .store
                .get_or_insert_record(record_key, || {
                    KeyPairRecord::from_keypair(&Keypair::generate())
                })
                .await?;
            Ok::<_, StoreError>(record.to_keypair()?)
        };

        let keypair = load.await.map_err(|source| MarketError::Identity {
            key: record_key.to_string(),
            source,
        })?;
        debug!(key = record_key, public_key = ?keypair.public_key(), "identity loaded");
        Ok(keypair)
    }

    /// Load the key pair stored under `record_key` without creating one.
    pub async fn get(&self, record_key: &str) -> Result<Option<Keypair>> {
        match self.store.get_record::<KeyPairRecord>(record_key).await? {
            Some(record) => Ok(Some(record.to_keypair()?)),
            None => Ok(None),
        }
    }
}
