//! The Market: entry point owning identities and persisted relationships.

use std::sync::Arc;

use tracing::info;

use feedmarket_access::Entitlement;
use feedmarket_core::{keys, Ed25519PublicKey, Keypair, SaleRecord};
use feedmarket_net::{FeedDeriver, FeedHandle, FeedOpener};
use feedmarket_store::{KvStore, KvStoreExt};

use crate::buyer::Buyer;
use crate::config::MarketConfig;
use crate::error::Result;
use crate::keystore::KeyStore;
use crate::provision::UniqueFeedProvisioner;
use crate::registry::{Buying, Registry, Selling};
use crate::seller::{Seller, SellerShared};

/// A marketplace node.
///
/// Owns the buyer identity shared by every purchase, the key store, and the
/// relationship records. Sellers and buyers created from one market share
/// its store.
pub struct Market {
    store: Arc<dyn KvStore>,
    key_store: KeyStore,
    identity: Keypair,
    config: MarketConfig,
}

impl Market {
    /// Open a market on `store`, loading or creating its identity.
    ///
    /// Fails with [`MarketError::Identity`](crate::MarketError::Identity) if
    /// the identity cannot be persisted.
    pub async fn open(store: Arc<dyn KvStore>, config: MarketConfig) -> Result<Self> {
        config.validate()?;
        let key_store = KeyStore::new(Arc::clone(&store));
        let identity = key_store.get_or_create(&keys::market_identity()).await?;
        info!(public_key = ?identity.public_key(), "market opened");

        Ok(Self {
            store,
            key_store,
            identity,
            config,
        })
    }

    /// The key this market authenticates as when buying.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.identity.public_key()
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }

    pub fn registry(&self) -> Registry {
        Registry::new(Arc::clone(&self.store))
    }

    /// Offer `master` for sale behind `entitlement`.
    ///
    /// Loads or creates the seller identity for the feed and records the sale.
    pub async fn seller(
        &self,
        master: FeedHandle,
        deriver: Arc<dyn FeedDeriver>,
        entitlement: Arc<dyn Entitlement>,
    ) -> Result<Seller> {
        master.ready().await?;
        let feed = master.public_key();
        let identity = self.key_store.get_or_create(&keys::seller_identity(&feed)).await?;

        if self
            .store
            .put_record_if_absent(&keys::sale(&feed), &SaleRecord { feed })
            .await?
        {
            info!(feed = ?feed, seller = ?identity.public_key(), "feed listed for sale");
        }

        let provisioner = UniqueFeedProvisioner::new(Arc::clone(&self.store), master, deriver);
        Ok(Seller::new(SellerShared {
            identity,
            entitlement,
            provisioner,
            config: self.config.clone(),
        }))
    }

    /// Buy from the seller identified by `seller`.
    ///
    /// If an earlier connection already taught us the seller's unique feed,
    /// it is opened now so replication resumes right after the handshake.
    pub async fn buyer(
        &self,
        seller: Ed25519PublicKey,
        opener: Arc<dyn FeedOpener>,
    ) -> Result<Buyer> {
        Buyer::open(
            self.identity.clone(),
            seller,
            opener,
            Arc::clone(&self.store),
            self.config.clone(),
        )
        .await
    }

    /// Sellers this market has bought from.
    pub async fn list_buying(&self) -> Result<Vec<Buying>> {
        self.registry().list_buying().await
    }

    /// Feeds this market sells.
    pub async fn list_selling(&self) -> Result<Vec<Selling>> {
        self.registry().list_selling().await
    }
}
