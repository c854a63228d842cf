//! Session plumbing shared by buyers and sellers.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{trace, warn};

use feedmarket_core::{Ed25519PublicKey, GrantInfo};
use feedmarket_net::Transport;

/// Observable events of one market session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The handshake completed with this remote key.
    Authenticated(Ed25519PublicKey),
    /// A unique feed is attached and replicating on this connection.
    FeedAttached(Ed25519PublicKey),
    /// Entitlement granted, with the check's info if the seller supplied any.
    Granted(Option<GrantInfo>),
    /// Entitlement denied, or the remote failed authentication.
    Denied(String),
    /// The session ended with an error.
    Error(String),
    /// Teardown finished. Always the last event delivered; skipped if the
    /// buffer is still full when the session ends.
    Closed,
}

/// Receiving end of a session's events.
pub type SessionEvents = mpsc::Receiver<SessionEvent>;

/// Sending half of a session's events.
///
/// Never holds a session past its transport: once the transport closes, an
/// event that does not fit in the buffer is dropped.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<SessionEvent>,
    transport: Arc<dyn Transport>,
}

impl EventSink {
    pub(crate) fn channel(
        capacity: usize,
        transport: Arc<dyn Transport>,
    ) -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, transport }, rx)
    }

    pub(crate) async fn emit(&self, event: SessionEvent) {
        let event = match self.tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Closed(_)) => {
                trace!("session event dropped, no receiver");
                return;
            }
            Err(TrySendError::Full(event)) => event,
        };

        // Wait for room, but only while the connection lives.
        tokio::select! {
            biased;
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    trace!("session event dropped, no receiver");
                }
            }
            _ = self.transport.closed() => {
                warn!(
                    capacity = self.tx.max_capacity(),
                    "event buffer full after close, dropping session event"
                );
            }
        }
    }
}

/// Run `fut` unless the transport closes first.
///
/// Returns `None` if the transport closed; `fut` is dropped unfinished.
pub(crate) async fn or_closed<F: Future>(transport: &dyn Transport, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = transport.closed() => None,
        out = fut => Some(out),
    }
}
