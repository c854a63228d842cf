//! Feed handle interfaces.
//!
//! Feeds are append-only logs owned by the replication engine. Markets never
//! read or write feed data; they only decide which feed replicates over which
//! transport and whether the local side uploads.

use std::sync::Arc;

use async_trait::async_trait;

use feedmarket_core::{DiscoveryKey, Ed25519PublicKey, Keypair};

use crate::error::Result;
use crate::transport::Transport;

/// Options for starting replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicateOptions {
    /// Keep the replication stream open for new data.
    pub live: bool,
}

impl Default for ReplicateOptions {
    fn default() -> Self {
        Self { live: true }
    }
}

/// A handle to a replicated feed.
#[async_trait]
pub trait Feed: Send + Sync {
    /// The feed's public key.
    fn public_key(&self) -> Ed25519PublicKey;

    /// The feed's discovery key.
    fn discovery_key(&self) -> DiscoveryKey {
        self.public_key().discovery_key()
    }

    /// Resolves once the feed is loaded and usable.
    async fn ready(&self) -> Result<()>;

    /// Start replicating this feed over `transport`.
    async fn replicate(&self, transport: Arc<dyn Transport>, options: ReplicateOptions)
        -> Result<()>;

    /// Enable or disable serving data to remote peers.
    fn set_uploading(&self, uploading: bool);

    /// Release the handle.
    async fn close(&self) -> Result<()>;
}

/// Shared handle to a feed.
pub type FeedHandle = Arc<dyn Feed>;

/// Derives a capability-restricted view of a master feed.
///
/// Deterministic: the same master and capability key pair always yield the
/// same feed.
#[async_trait]
pub trait FeedDeriver: Send + Sync {
    async fn derive(&self, master: &FeedHandle, capability: &Keypair) -> Result<FeedHandle>;
}

/// Opens a feed by its public key, creating local storage if necessary.
#[async_trait]
pub trait FeedOpener: Send + Sync {
    async fn open(&self, public_key: &Ed25519PublicKey) -> Result<FeedHandle>;
}
