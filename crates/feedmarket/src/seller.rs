//! Seller side: one master feed offered behind an entitlement check.

use std::sync::Arc;

use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use feedmarket_access::{Entitlement, ValidationState};
use feedmarket_core::{CapabilityRecord, DiscoveryKey, Ed25519PublicKey, Keypair};
use feedmarket_net::{AcceptAll, FeedHandle, Transport, MARKET_EXTENSIONS};

use crate::config::MarketConfig;
use crate::error::Result;
use crate::provision::UniqueFeedProvisioner;
use crate::session::{EventSink, SessionEvent, SessionEvents};
use crate::validation::ValidationLoop;

pub(crate) struct SellerShared {
    pub(crate) identity: Keypair,
    pub(crate) entitlement: Arc<dyn Entitlement>,
    pub(crate) provisioner: UniqueFeedProvisioner,
    pub(crate) config: MarketConfig,
}

/// A master feed offered for sale.
///
/// Cheap to clone. Every connection gets its own [`SellerSession`] from
/// [`Seller::sell`]; sessions share only the store and the master feed.
#[derive(Clone)]
pub struct Seller {
    inner: Arc<SellerShared>,
}

impl Seller {
    pub(crate) fn new(inner: SellerShared) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// The identity buyers authenticate this seller by.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.inner.identity.public_key()
    }

    /// The master feed's key.
    pub fn feed_key(&self) -> Ed25519PublicKey {
        self.inner.provisioner.master().public_key()
    }

    /// Topic buyers look the seller up by.
    pub fn discovery_key(&self) -> DiscoveryKey {
        self.inner.provisioner.master().discovery_key()
    }

    /// The capability record issued to `buyer`, if any.
    pub async fn capability_for(&self, buyer: &Ed25519PublicKey) -> Result<Option<CapabilityRecord>> {
        self.inner.provisioner.capability_for(buyer).await
    }

    /// Create the session for one incoming connection.
    pub fn sell(&self, transport: Arc<dyn Transport>) -> (SellerSession, SessionEvents) {
        let (events, rx) =
            EventSink::channel(self.inner.config.event_buffer, Arc::clone(&transport));
        let (state, _) = watch::channel(ValidationState::Unvalidated);
        let session = SellerSession {
            seller: Arc::clone(&self.inner),
            transport,
            events,
            state,
            feed: OnceCell::new(),
        };
        (session, rx)
    }
}

/// One buyer connection on the seller side.
///
/// Accepts any authenticated peer; rejection happens through the
/// entitlement check, never at the handshake.
pub struct SellerSession {
    pub(crate) seller: Arc<SellerShared>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: EventSink,
    pub(crate) state: watch::Sender<ValidationState>,
    /// The buyer's unique feed, attached on first grant.
    pub(crate) feed: OnceCell<FeedHandle>,
}

impl SellerSession {
    /// Watch the session's validation state.
    pub fn state(&self) -> watch::Receiver<ValidationState> {
        self.state.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Drive the session until the transport closes.
    ///
    /// Closure returns `Ok(())`. Provisioning failures end the session with
    /// an error; entitlement denials never do.
    pub async fn run(mut self) -> Result<()> {
        let result = match self.drive().await {
            Err(e) if e.is_closure() => Ok(()),
            other => other,
        };

        if let Err(e) = &result {
            warn!(error = %e, "seller session failed");
            self.events.emit(SessionEvent::Error(e.to_string())).await;
        }
        self.teardown().await;
        self.events.emit(SessionEvent::Closed).await;
        result
    }

    /// Run the session on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn drive(&self) -> Result<()> {
        for spec in MARKET_EXTENSIONS.iter() {
            self.transport
                .register_extension(spec.name, spec.encoding)
                .await?;
        }

        let remote = self
            .transport
            .handshake(&self.seller.identity, &AcceptAll)
            .await?;
        info!(buyer = ?remote, seller = ?self.seller.identity.public_key(), "buyer connected");
        self.events.emit(SessionEvent::Authenticated(remote)).await;

        ValidationLoop::new(self, remote).run().await
    }

    /// Runs exactly once, after `drive` returns.
    async fn teardown(&mut self) {
        self.transport.close();
        if let Some(feed) = self.feed.take() {
            if let Err(e) = feed.close().await {
                warn!(error = %e, "failed to close unique feed");
            }
        }
    }
}
