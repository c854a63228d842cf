//! The seller's revalidation loop.
//!
//! Checks entitlement right after the handshake and again one interval after
//! each check completes, so checks never overlap. Every step races the
//! transport's closure: a check that completes after close is dropped
//! without re-arming the timer or touching the dead channel.

use std::time::Duration;

use tracing::{debug, info};

use feedmarket_access::{CheckOutcome, Transition, ValidationMachine};
use feedmarket_core::{Ed25519PublicKey, GrantInfo};
use feedmarket_net::{ExtensionMessage, FeedHandle, ReplicateOptions};

use crate::error::{MarketError, Result};
use crate::seller::SellerSession;
use crate::session::{or_closed, SessionEvent};

pub(crate) struct ValidationLoop<'a> {
    session: &'a SellerSession,
    remote: Ed25519PublicKey,
    machine: ValidationMachine,
    interval: Duration,
}

impl<'a> ValidationLoop<'a> {
    pub(crate) fn new(session: &'a SellerSession, remote: Ed25519PublicKey) -> Self {
        Self {
            session,
            remote,
            machine: ValidationMachine::new(),
            interval: session.seller.config.revalidate_interval(),
        }
    }

    /// Loop until the transport closes.
    pub(crate) async fn run(mut self) -> Result<()> {
        let session = self.session;
        let remote = self.remote;
        let transport = session.transport.as_ref();
        let entitlement = session.seller.entitlement.as_ref();

        loop {
            let Some(result) = or_closed(transport, entitlement.check(&remote)).await else {
                return Ok(());
            };
            self.step(CheckOutcome::from(result)).await?;

            if !self.idle().await? {
                return Ok(());
            }
        }
    }

    async fn step(&mut self, outcome: CheckOutcome) -> Result<()> {
        if matches!(outcome, CheckOutcome::Granted(_)) {
            self.attach_feed().await?;
        }

        match self.machine.apply(outcome) {
            Some(Transition::Granted { info }) => self.grant(info).await?,
            Some(Transition::Denied { reason }) => self.deny(reason).await?,
            None => debug!(buyer = ?self.remote, state = ?self.machine.state(), "entitlement unchanged"),
        }
        self.session.state.send_replace(self.machine.state());
        Ok(())
    }

    /// Provision, announce and replicate the unique feed. Runs once per session.
    async fn attach_feed(&self) -> Result<&'a FeedHandle> {
        let session = self.session;
        let remote = self.remote;

        session
            .feed
            .get_or_try_init(|| async move {
                let transport = session.transport.as_ref();
                let feed = session
                    .seller
                    .provisioner
                    .provision(&remote, transport)
                    .await?;

                let announced = match or_closed(transport, announce(session, &feed)).await {
                    Some(Ok(())) => Ok(()),
                    Some(Err(e)) if !e.is_closure() => Err(e),
                    _ => Err(MarketError::StreamClosed),
                };
                if let Err(e) = announced {
                    if let Err(close_err) = feed.close().await {
                        debug!(error = %close_err, "closing unannounced unique feed");
                    }
                    return Err(e);
                }

                info!(buyer = ?remote, feed = ?feed.public_key(), "unique feed attached");
                session
                    .events
                    .emit(SessionEvent::FeedAttached(feed.public_key()))
                    .await;
                Ok::<_, MarketError>(feed)
            })
            .await
    }

    async fn grant(&self, info: Option<GrantInfo>) -> Result<()> {
        if let Some(feed) = self.session.feed.get() {
            feed.set_uploading(true);
        }
        if let Some(info) = &info {
            self.send(ExtensionMessage::Valid(info.clone())).await?;
        }
        info!(buyer = ?self.remote, "entitlement granted");
        self.session.events.emit(SessionEvent::Granted(info)).await;
        Ok(())
    }

    async fn deny(&self, reason: String) -> Result<()> {
        if let Some(feed) = self.session.feed.get() {
            feed.set_uploading(false);
        }
        self.send(ExtensionMessage::Invalid {
            error: reason.clone(),
        })
        .await?;
        info!(buyer = ?self.remote, %reason, "entitlement denied");
        self.session.events.emit(SessionEvent::Denied(reason)).await;
        Ok(())
    }

    async fn send(&self, message: ExtensionMessage) -> Result<()> {
        let payload = message.encode()?;
        self.session
            .transport
            .send(message.channel(), payload)
            .await?;
        Ok(())
    }

    /// Wait out the interval, discarding anything the buyer sends.
    ///
    /// Returns false if the transport closed first.
    async fn idle(&self) -> Result<bool> {
        let transport = self.session.transport.as_ref();
        let sleep = tokio::time::sleep(self.interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = transport.closed() => return Ok(false),
                _ = &mut sleep => return Ok(true),
                frame = transport.recv() => match frame? {
                    Some(frame) => debug!(extension = %frame.extension, "ignoring message from buyer"),
                    None => return Ok(false),
                },
            }
        }
    }
}

/// Send the one-time feed key, then start replicating. The key always
/// precedes replication.
async fn announce(session: &SellerSession, feed: &FeedHandle) -> Result<()> {
    let message = ExtensionMessage::OneTimeFeed(feed.public_key());
    session
        .transport
        .send(message.channel(), message.encode()?)
        .await?;

    let options = ReplicateOptions {
        live: session.seller.config.live,
    };
    feed.replicate(session.transport.clone(), options).await?;
    Ok(())
}
