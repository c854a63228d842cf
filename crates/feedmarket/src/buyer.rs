//! Buyer side: replicating one seller's feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use feedmarket_core::{keys, BuyRecord, Ed25519PublicKey, Keypair};
use feedmarket_net::{
    ExpectPeer, ExtensionMessage, FeedHandle, FeedOpener, NetError, ReplicateOptions, Transport,
    MARKET_EXTENSIONS,
};
use feedmarket_store::{KvStore, KvStoreExt};

use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::session::{or_closed, EventSink, SessionEvent, SessionEvents};

pub(crate) struct BuyerShared {
    pub(crate) identity: Keypair,
    pub(crate) seller: Ed25519PublicKey,
    pub(crate) opener: Arc<dyn FeedOpener>,
    pub(crate) store: Arc<dyn KvStore>,
    pub(crate) config: MarketConfig,
    /// First attached feed; authoritative for the life of the buyer.
    feed: OnceCell<FeedHandle>,
    closed: AtomicBool,
}

/// A purchase relationship with one seller.
///
/// Cheap to clone. Each connection to the seller gets its own
/// [`BuyerSession`] from [`Buyer::buy`].
#[derive(Clone)]
pub struct Buyer {
    inner: Arc<BuyerShared>,
}

impl Buyer {
    /// Create the buyer, pre-attaching the feed remembered from an earlier
    /// connection if a buy record exists.
    pub(crate) async fn open(
        identity: Keypair,
        seller: Ed25519PublicKey,
        opener: Arc<dyn FeedOpener>,
        store: Arc<dyn KvStore>,
        config: MarketConfig,
    ) -> Result<Self> {
        let remembered: Option<BuyRecord> = store.get_record(&keys::buy(&seller)).await?;
        let buyer = Self {
            inner: Arc::new(BuyerShared {
                identity,
                seller,
                opener,
                store,
                config,
                feed: OnceCell::new(),
                closed: AtomicBool::new(false),
            }),
        };

        if let Some(record) = remembered {
            let feed = buyer.open_feed(&record.feed).await?;
            debug!(seller = ?seller, feed = ?record.feed, "resuming remembered feed");
            // Freshly created cell; cannot already be set.
            let _ = buyer.inner.feed.set(feed);
        }
        Ok(buyer)
    }

    /// The seller this buyer expects to authenticate.
    pub fn seller_key(&self) -> Ed25519PublicKey {
        self.inner.seller
    }

    /// The attached unique feed, if one is known yet.
    pub fn feed(&self) -> Option<FeedHandle> {
        self.inner.feed.get().cloned()
    }

    /// Create the session for one connection to the seller.
    pub fn buy(&self, transport: Arc<dyn Transport>) -> (BuyerSession, SessionEvents) {
        let (events, rx) =
            EventSink::channel(self.inner.config.event_buffer, Arc::clone(&transport));
        let session = BuyerSession {
            buyer: Arc::clone(&self.inner),
            transport,
            events,
            replicating: false,
        };
        (session, rx)
    }

    /// Release the attached feed. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(feed) = self.inner.feed.get() {
            feed.close().await?;
        }
        Ok(())
    }

    async fn open_feed(&self, key: &Ed25519PublicKey) -> Result<FeedHandle> {
        self.inner.open_feed(key).await
    }
}

impl BuyerShared {
    async fn open_feed(&self, key: &Ed25519PublicKey) -> Result<FeedHandle> {
        let feed = self.opener.open(key).await?;
        feed.ready().await?;
        Ok(feed)
    }
}

/// One connection to the seller on the buyer side.
pub struct BuyerSession {
    buyer: Arc<BuyerShared>,
    transport: Arc<dyn Transport>,
    events: EventSink,
    replicating: bool,
}

impl BuyerSession {
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Drive the session until the transport closes.
    ///
    /// Returns [`MarketError::Authentication`] if the remote is not the
    /// expected seller; closure returns `Ok(())`.
    pub async fn run(mut self) -> Result<()> {
        let result = match self.drive().await {
            Err(e) if e.is_closure() => Ok(()),
            other => other,
        };

        if let Err(e) = &result {
            self.events.emit(SessionEvent::Error(e.to_string())).await;
        }
        self.transport.close();
        self.events.emit(SessionEvent::Closed).await;
        result
    }

    /// Run the session on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn drive(&mut self) -> Result<()> {
        for spec in MARKET_EXTENSIONS.iter() {
            self.transport
                .register_extension(spec.name, spec.encoding)
                .await?;
        }

        let expected = ExpectPeer(self.buyer.seller);
        let remote = match self
            .transport
            .handshake(&self.buyer.identity, &expected)
            .await
        {
            Ok(remote) => remote,
            Err(NetError::AuthenticationRejected(reason)) => {
                warn!(seller = ?self.buyer.seller, %reason, "seller failed authentication");
                self.events.emit(SessionEvent::Denied(reason.clone())).await;
                return Err(MarketError::Authentication(reason));
            }
            Err(e) => return Err(e.into()),
        };
        info!(seller = ?remote, "connected to seller");
        self.events.emit(SessionEvent::Authenticated(remote)).await;

        if let Some(feed) = self.buyer.feed.get().cloned() {
            self.replicate(feed).await?;
        }

        while let Some(frame) = self.transport.recv().await? {
            match ExtensionMessage::decode(&frame.extension, &frame.payload) {
                Ok(ExtensionMessage::OneTimeFeed(key)) => self.on_one_time_feed(key).await?,
                Ok(ExtensionMessage::Valid(info)) => {
                    self.events.emit(SessionEvent::Granted(Some(info))).await
                }
                Ok(ExtensionMessage::Invalid { error }) => {
                    self.events.emit(SessionEvent::Denied(error)).await
                }
                Err(e) => warn!(error = %e, "dropping malformed message from seller"),
            }
        }
        Ok(())
    }

    async fn on_one_time_feed(&mut self, key: Ed25519PublicKey) -> Result<()> {
        let buyer = Arc::clone(&self.buyer);
        let attach = buyer.feed.get_or_try_init(|| buyer.open_feed(&key));
        let feed = match or_closed(self.transport.as_ref(), attach).await {
            Some(feed) => feed?.clone(),
            None => return Ok(()),
        };

        if feed.public_key() != key {
            debug!(attached = ?feed.public_key(), offered = ?key, "ignoring feed key, already attached");
            return Ok(());
        }

        let record = BuyRecord {
            seller: buyer.seller,
            feed: key,
        };
        if buyer
            .store
            .put_record_if_absent(&keys::buy(&buyer.seller), &record)
            .await?
        {
            info!(seller = ?buyer.seller, feed = ?key, "purchase recorded");
        }

        self.replicate(feed).await
    }

    /// Start replicating `feed`, at most once per session.
    async fn replicate(&mut self, feed: FeedHandle) -> Result<()> {
        if self.replicating {
            return Ok(());
        }
        let options = ReplicateOptions {
            live: self.buyer.config.live,
        };
        feed.replicate(Arc::clone(&self.transport), options).await?;
        self.replicating = true;

        debug!(feed = ?feed.public_key(), "replicating");
        self.events
            .emit(SessionEvent::FeedAttached(feed.public_key()))
            .await;
        Ok(())
    }
}
