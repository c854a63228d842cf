//! Enumeration of persisted buy and sell relationships.
//!
//! Offline introspection only; the live protocol never consults the registry.

use std::sync::Arc;

use tracing::warn;

use feedmarket_core::{decode_record, keys, BuyRecord, Ed25519PublicKey, KeyPairRecord, SaleRecord};
use feedmarket_store::{KvStore, KvStoreExt};

use crate::error::Result;

/// A seller this market has bought from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buying {
    pub seller: Ed25519PublicKey,
    /// The unique feed the seller issued to us.
    pub feed: Ed25519PublicKey,
}

/// A master feed this market sells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selling {
    /// The identity buyers authenticate the seller by.
    pub seller: Ed25519PublicKey,
    pub feed: Ed25519PublicKey,
}

/// Read-only view over the persisted relationship records.
///
/// Result order follows the store's key order and is not a contract.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn KvStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Every seller with a recorded purchase.
    pub async fn list_buying(&self) -> Result<Vec<Buying>> {
        let mut cursor = self.store.iter_prefix(keys::BUYS_PREFIX);
        let mut out = Vec::new();

        while let Some((key, bytes)) = cursor.next_entry().await? {
            match decode_record::<BuyRecord>(&bytes) {
                Ok(record) => out.push(Buying {
                    seller: record.seller,
                    feed: record.feed,
                }),
                Err(e) => warn!(%key, error = %e, "skipping unreadable buy record"),
            }
        }
        Ok(out)
    }

    /// Every master feed offered for sale, joined with its seller identity.
    pub async fn list_selling(&self) -> Result<Vec<Selling>> {
        let mut cursor = self.store.iter_prefix(keys::SALES_PREFIX);
        let mut out = Vec::new();

        while let Some((key, bytes)) = cursor.next_entry().await? {
            let sale = match decode_record::<SaleRecord>(&bytes) {
                Ok(sale) => sale,
                Err(e) => {
                    warn!(%key, error = %e, "skipping unreadable sale record");
                    continue;
                }
            };

            let identity: Option<KeyPairRecord> = self
                .store
                .get_record(&keys::seller_identity(&sale.feed))
                .await?;
            match identity {
                Some(identity) => out.push(Selling {
                    seller: identity.public_key,
                    feed: sale.feed,
                }),
                None => warn!(feed = ?sale.feed, "sale without seller identity"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedmarket_core::Keypair;
    use feedmarket_store::MemoryStore;

    fn key(n: u8) -> Ed25519PublicKey {
        Ed25519PublicKey::from_bytes([n; 32])
    }

    #[tokio::test]
    async fn test_empty_store_lists_nothing() {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        assert!(registry.list_buying().await.unwrap().is_empty());
        assert!(registry.list_selling().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_buying_reads_every_record() {
        let store = Arc::new(MemoryStore::new());
        for n in 1..=3u8 {
            let record = BuyRecord {
                seller: key(n),
                feed: key(n + 100),
            };
            store.put_record(&keys::buy(&key(n)), &record).await.unwrap();
        }
        // Unrelated namespace.
        store
            .put_record(&keys::sale(&key(9)), &SaleRecord { feed: key(9) })
            .await
            .unwrap();

        let mut buying = Registry::new(store).list_buying().await.unwrap();
        buying.sort_by_key(|b| b.seller);
        assert_eq!(buying.len(), 3);
        assert_eq!(buying[0], Buying { seller: key(1), feed: key(101) });
    }

    #[tokio::test]
    async fn test_list_selling_joins_identity() {
        let store = Arc::new(MemoryStore::new());
        let seller = Keypair::generate();
        let feed = key(7);

        store
            .put_record(&keys::seller_identity(&feed), &KeyPairRecord::from_keypair(&seller))
            .await
            .unwrap();
        store
            .put_record(&keys::sale(&feed), &SaleRecord { feed })
            .await
            .unwrap();
        // A sale whose identity is missing is skipped.
        store
            .put_record(&keys::sale(&key(8)), &SaleRecord { feed: key(8) })
            .await
            .unwrap();

        let selling = Registry::new(store).list_selling().await.unwrap();
        assert_eq!(
            selling,
            vec![Selling {
                seller: seller.public_key(),
                feed
            }]
        );
    }

    #[tokio::test]
    async fn test_paging_past_one_batch() {
        let store = Arc::new(MemoryStore::new());
        for n in 0..150u8 {
            let seller = Ed25519PublicKey::from_bytes([n; 32]);
            store
                .put_record(&keys::buy(&seller), &BuyRecord { seller, feed: key(0) })
                .await
                .unwrap();
        }

        assert_eq!(Registry::new(store).list_buying().await.unwrap().len(), 150);
    }
}
