//! Per-buyer unique feed provisioning.

use std::sync::Arc;

use tracing::{debug, info, warn};

use feedmarket_core::{keys, CapabilityRecord, Ed25519PublicKey, KeyPairRecord, Keypair};
use feedmarket_net::{FeedDeriver, FeedHandle, Transport};
use feedmarket_store::{KvStore, KvStoreExt};

use crate::error::{MarketError, Result};
use crate::session::or_closed;

/// Issues each buyer a capability-restricted view of one master feed.
///
/// The capability key pair for a (master, buyer) pair is persisted before it
/// is ever returned, so a buyer is issued the same derived feed on every
/// connection for the lifetime of the store.
pub struct UniqueFeedProvisioner {
    store: Arc<dyn KvStore>,
    master: FeedHandle,
    deriver: Arc<dyn FeedDeriver>,
}

impl UniqueFeedProvisioner {
    pub fn new(store: Arc<dyn KvStore>, master: FeedHandle, deriver: Arc<dyn FeedDeriver>) -> Self {
        Self {
            store,
            master,
            deriver,
        }
    }

    /// The master feed being sold.
    pub fn master(&self) -> &FeedHandle {
        &self.master
    }

    /// Look up the stored capability record for `buyer`.
    pub async fn capability_for(&self, buyer: &Ed25519PublicKey) -> Result<Option<CapabilityRecord>> {
        let key = keys::capability(&self.master.public_key(), buyer);
        Ok(self.store.get_record(&key).await?)
    }

    /// Load the capability key pair for `buyer`, creating and persisting one
    /// if absent.
    pub async fn capability(&self, buyer: &Ed25519PublicKey) -> Result<Keypair> {
        let key = keys::capability(&self.master.public_key(), buyer);
        let record: CapabilityRecord = self
            .store
            .get_or_insert_record(&key, || CapabilityRecord {
                buyer: *buyer,
                key_pair: KeyPairRecord::from_keypair(&Keypair::generate()),
            })
            .await?;

        if record.buyer != *buyer {
            warn!(%key, stored = ?record.buyer, "capability record names another buyer");
        }
        Ok(record.key_pair.to_keypair()?)
    }

    /// Provision the unique feed for `buyer` on `transport`.
    ///
    /// Aborts with [`MarketError::StreamClosed`] if the transport closes
    /// before the feed is ready; no handle escapes a dead connection.
    pub async fn provision(
        &self,
        buyer: &Ed25519PublicKey,
        transport: &dyn Transport,
    ) -> Result<FeedHandle> {
        let capability = or_closed(transport, self.capability(buyer))
            .await
            .ok_or(MarketError::StreamClosed)??;

        let feed = or_closed(transport, self.deriver.derive(&self.master, &capability))
            .await
            .ok_or(MarketError::StreamClosed)??;

        let ready = or_closed(transport, feed.ready()).await;
        if !matches!(ready, Some(Ok(()))) || transport.is_closed() {
            if let Err(e) = feed.close().await {
                debug!(error = %e, "closing abandoned unique feed");
            }
            return match ready {
                Some(Err(e)) => Err(e.into()),
                _ => Err(MarketError::StreamClosed),
            };
        }

        info!(buyer = ?buyer, feed = ?feed.public_key(), "unique feed provisioned");
        Ok(feed)
    }
}
