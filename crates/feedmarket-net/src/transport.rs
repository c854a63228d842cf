//! Transport abstraction for market sessions.
//!
//! A transport is one authenticated, bidirectional connection to one peer.
//! Besides feed data it multiplexes named extension channels that carry the
//! market's control messages. Implementations may wrap any secure stream.

use async_trait::async_trait;
use bytes::Bytes;

use feedmarket_core::{Ed25519PublicKey, Keypair};

use crate::error::Result;
use crate::messages::Encoding;

/// A message received on a registered extension channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionFrame {
    /// The channel name.
    pub extension: String,
    /// The encoding the channel was registered with.
    pub encoding: Encoding,
    pub payload: Bytes,
}

/// Decides whether an authenticated remote key may proceed past the handshake.
pub trait Authenticator: Send + Sync {
    /// Return `Err(reason)` to reject the peer.
    fn authenticate(&self, remote: &Ed25519PublicKey) -> std::result::Result<(), String>;
}

/// Accepts every peer that proves ownership of its key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&self, _remote: &Ed25519PublicKey) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Accepts exactly one expected peer key.
#[derive(Debug, Clone, Copy)]
pub struct ExpectPeer(pub Ed25519PublicKey);

impl Authenticator for ExpectPeer {
    fn authenticate(&self, remote: &Ed25519PublicKey) -> std::result::Result<(), String> {
        if remote == &self.0 {
            Ok(())
        } else {
            Err(format!("expected peer {}, got {}", self.0, remote))
        }
    }
}

/// Transport trait for one authenticated peer connection.
///
/// Implementations must be thread-safe (Send + Sync).
///
/// # Lifecycle
///
/// 1. `register_extension` for every channel the session uses.
/// 2. `handshake` exchanges identities and runs the authenticator.
/// 3. `send` / `recv` on extension channels until `close`.
///
/// Closing is idempotent and may come from either side at any time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register an extension channel.
    ///
    /// Must happen before the handshake; frames on unknown channels are dropped.
    async fn register_extension(&self, name: &str, encoding: Encoding) -> Result<()>;

    /// Run the handshake with `identity` as the local key pair.
    ///
    /// Returns the remote's authenticated public key. On rejection the
    /// transport is closed.
    async fn handshake(
        &self,
        identity: &Keypair,
        authenticator: &dyn Authenticator,
    ) -> Result<Ed25519PublicKey>;

    /// The remote key, once the handshake has completed.
    fn remote_public_key(&self) -> Option<Ed25519PublicKey>;

    /// Send a payload on a registered extension channel.
    async fn send(&self, extension: &str, payload: Bytes) -> Result<()>;

    /// Receive the next extension frame.
    ///
    /// Returns `None` once the transport is closed.
    async fn recv(&self) -> Result<Option<ExtensionFrame>>;

    /// Resolves once the transport is closed.
    async fn closed(&self);

    /// Tear the connection down. Idempotent.
    fn close(&self);

    /// Whether the transport has been torn down.
    fn is_closed(&self) -> bool;
}

/// A linked in-memory transport pair.
///
/// Frames travel over unbounded channels; closing either end closes both.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use feedmarket_core::Ed25519Signature;
    use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

    use crate::error::NetError;

    const HANDSHAKE_CONTEXT: &[u8] = b"feedmarket handshake v0";

    #[derive(Debug)]
    enum Frame {
        Hello {
            public_key: Ed25519PublicKey,
            nonce: [u8; 32],
        },
        Proof {
            signature: Ed25519Signature,
        },
        Extension {
            name: String,
            payload: Bytes,
        },
    }

    impl Frame {
        fn kind(&self) -> &'static str {
            match self {
                Frame::Hello { .. } => "hello",
                Frame::Proof { .. } => "proof",
                Frame::Extension { .. } => "extension",
            }
        }
    }

    #[derive(Default)]
    struct LinkState {
        handshake_started: bool,
        remote: Option<Ed25519PublicKey>,
    }

    /// What a peer signs to prove it owns `signer`: the challenger's nonce.
    fn proof_message(nonce: &[u8; 32], signer: &Ed25519PublicKey) -> Vec<u8> {
        let mut msg = Vec::with_capacity(HANDSHAKE_CONTEXT.len() + 64);
        msg.extend_from_slice(HANDSHAKE_CONTEXT);
        msg.extend_from_slice(nonce);
        msg.extend_from_slice(signer.as_bytes());
        msg
    }

    /// One end of an in-memory connection.
    pub struct MemoryTransport {
        outgoing: mpsc::UnboundedSender<Frame>,
        incoming: AsyncMutex<mpsc::UnboundedReceiver<Frame>>,
        extensions: Mutex<HashMap<String, Encoding>>,
        state: Mutex<LinkState>,
        /// Shared by both ends.
        closed: Arc<watch::Sender<bool>>,
    }

    impl MemoryTransport {
        /// Create two linked ends.
        pub fn pair() -> (Self, Self) {
            let (a_tx, a_rx) = mpsc::unbounded_channel();
            let (b_tx, b_rx) = mpsc::unbounded_channel();
            let (closed, _) = watch::channel(false);
            let closed = Arc::new(closed);

            let a = Self::new(a_tx, b_rx, Arc::clone(&closed));
            let b = Self::new(b_tx, a_rx, closed);
            (a, b)
        }

        fn new(
            outgoing: mpsc::UnboundedSender<Frame>,
            incoming: mpsc::UnboundedReceiver<Frame>,
            closed: Arc<watch::Sender<bool>>,
        ) -> Self {
            Self {
                outgoing,
                incoming: AsyncMutex::new(incoming),
                extensions: Mutex::new(HashMap::new()),
                state: Mutex::new(LinkState::default()),
                closed,
            }
        }

        fn state(&self) -> MutexGuard<'_, LinkState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn extensions(&self) -> MutexGuard<'_, HashMap<String, Encoding>> {
            self.extensions.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn push(&self, frame: Frame) -> Result<()> {
            if self.is_closed() {
                return Err(NetError::Closed);
            }
            self.outgoing.send(frame).map_err(|_| {
                self.close();
                NetError::Closed
            })
        }

        /// Close the link and hand back `err`.
        fn fail(&self, err: NetError) -> NetError {
            self.close();
            err
        }

        async fn next_frame(&self) -> Result<Frame> {
            let mut incoming = self.incoming.lock().await;
            let mut closed = self.closed.subscribe();

            tokio::select! {
                biased;
                _ = closed.wait_for(|c| *c) => Err(NetError::Closed),
                frame = incoming.recv() => match frame {
                    Some(frame) => Ok(frame),
                    None => Err(self.fail(NetError::Closed)),
                },
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn register_extension(&self, name: &str, encoding: Encoding) -> Result<()> {
            if self.state().handshake_started {
                return Err(NetError::LateRegistration(name.to_string()));
            }
            self.extensions().insert(name.to_string(), encoding);
            Ok(())
        }

        async fn handshake(
            &self,
            identity: &Keypair,
            authenticator: &dyn Authenticator,
        ) -> Result<Ed25519PublicKey> {
            {
                let mut state = self.state();
                if state.handshake_started {
                    return Err(NetError::ProtocolViolation(
                        "handshake already started".into(),
                    ));
                }
                state.handshake_started = true;
            }

            let local = identity.public_key();
            let nonce: [u8; 32] = rand::random();
            self.push(Frame::Hello {
                public_key: local,
                nonce,
            })?;

            let (remote, remote_nonce) = match self.next_frame().await? {
                Frame::Hello { public_key, nonce } => (public_key, nonce),
                other => {
                    return Err(self.fail(NetError::ProtocolViolation(format!(
                        "expected hello, got {}",
                        other.kind()
                    ))))
                }
            };

            self.push(Frame::Proof {
                signature: identity.sign(&proof_message(&remote_nonce, &local)),
            })?;

            match self.next_frame().await? {
                Frame::Proof { signature } => remote
                    .verify(&proof_message(&nonce, &remote), &signature)
                    .map_err(|e| self.fail(NetError::HandshakeFailed(e.to_string())))?,
                other => {
                    return Err(self.fail(NetError::ProtocolViolation(format!(
                        "expected proof, got {}",
                        other.kind()
                    ))))
                }
            }

            if let Err(reason) = authenticator.authenticate(&remote) {
                tracing::debug!(remote = ?remote, %reason, "rejecting peer");
                return Err(self.fail(NetError::AuthenticationRejected(reason)));
            }

            self.state().remote = Some(remote);
            Ok(remote)
        }

        fn remote_public_key(&self) -> Option<Ed25519PublicKey> {
            self.state().remote
        }

        async fn send(&self, extension: &str, payload: Bytes) -> Result<()> {
            if self.is_closed() {
                return Err(NetError::Closed);
            }
            if self.state().remote.is_none() {
                return Err(NetError::ProtocolViolation("send before handshake".into()));
            }
            if !self.extensions().contains_key(extension) {
                return Err(NetError::UnknownExtension(extension.to_string()));
            }

            self.push(Frame::Extension {
                name: extension.to_string(),
                payload,
            })
        }

        async fn recv(&self) -> Result<Option<ExtensionFrame>> {
            if self.state().remote.is_none() {
                return Err(NetError::ProtocolViolation("recv before handshake".into()));
            }

            loop {
                let frame = match self.next_frame().await {
                    Ok(frame) => frame,
                    Err(NetError::Closed) => return Ok(None),
                    Err(e) => return Err(e),
                };

                match frame {
                    Frame::Extension { name, payload } => {
                        let encoding = self.extensions().get(&name).copied();
                        match encoding {
                            Some(encoding) => {
                                return Ok(Some(ExtensionFrame {
                                    extension: name,
                                    encoding,
                                    payload,
                                }))
                            }
                            None => {
                                tracing::warn!(extension = %name, "dropping frame for unregistered extension")
                            }
                        }
                    }
                    other => {
                        tracing::warn!(frame = other.kind(), "dropping handshake frame after handshake")
                    }
                }
            }
        }

        async fn closed(&self) {
            let mut closed = self.closed.subscribe();
            let _ = closed.wait_for(|c| *c).await;
        }

        fn close(&self) {
            if !self.closed.send_replace(true) {
                tracing::debug!("memory transport closed");
            }
        }

        fn is_closed(&self) -> bool {
            *self.closed.borrow()
        }
    }

    impl Drop for MemoryTransport {
        fn drop(&mut self) {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryTransport;
    use super::*;
    use crate::error::NetError;
    use crate::messages::{ONE_TIME_FEED, VALID};
    use std::time::Duration;

    async fn connected(a_id: &Keypair, b_id: &Keypair) -> (MemoryTransport, MemoryTransport) {
        let (a, b) = MemoryTransport::pair();
        for t in [&a, &b] {
            t.register_extension(ONE_TIME_FEED, Encoding::Binary).await.unwrap();
        }
        let (ra, rb) = tokio::join!(a.handshake(a_id, &AcceptAll), b.handshake(b_id, &AcceptAll));
        assert_eq!(ra.unwrap(), b_id.public_key());
        assert_eq!(rb.unwrap(), a_id.public_key());
        (a, b)
    }

    #[tokio::test]
    async fn test_handshake_exchanges_keys() {
        let a_id = Keypair::generate();
        let b_id = Keypair::generate();
        let (a, b) = connected(&a_id, &b_id).await;

        assert_eq!(a.remote_public_key(), Some(b_id.public_key()));
        assert_eq!(b.remote_public_key(), Some(a_id.public_key()));
    }

    #[tokio::test]
    async fn test_send_recv_on_registered_extension() {
        let (a, b) = connected(&Keypair::generate(), &Keypair::generate()).await;

        a.send(ONE_TIME_FEED, Bytes::from_static(b"key")).await.unwrap();
        let frame = b.recv().await.unwrap().unwrap();
        assert_eq!(frame.extension, ONE_TIME_FEED);
        assert_eq!(frame.encoding, Encoding::Binary);
        assert_eq!(&frame.payload[..], b"key");
    }

    #[tokio::test]
    async fn test_unregistered_extension_is_not_sendable_or_routable() {
        let (a, b) = MemoryTransport::pair();
        a.register_extension(VALID, Encoding::Cbor).await.unwrap();
        a.register_extension(ONE_TIME_FEED, Encoding::Binary).await.unwrap();
        b.register_extension(ONE_TIME_FEED, Encoding::Binary).await.unwrap();

        let (a_id, b_id) = (Keypair::generate(), Keypair::generate());
        let (ra, rb) = tokio::join!(a.handshake(&a_id, &AcceptAll), b.handshake(&b_id, &AcceptAll));
        ra.unwrap();
        rb.unwrap();

        assert!(matches!(
            b.send(VALID, Bytes::new()).await,
            Err(NetError::UnknownExtension(_))
        ));

        // B never registered `valid`, so the frame is dropped and the next one wins.
        a.send(VALID, Bytes::from_static(b"lost")).await.unwrap();
        a.send(ONE_TIME_FEED, Bytes::from_static(b"kept")).await.unwrap();
        let frame = b.recv().await.unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"kept");
    }

    #[tokio::test]
    async fn test_registration_after_handshake_rejected() {
        let (a, _b) = connected(&Keypair::generate(), &Keypair::generate()).await;
        assert!(matches!(
            a.register_extension(VALID, Encoding::Cbor).await,
            Err(NetError::LateRegistration(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticator_rejection_closes_both_ends() {
        let (a, b) = MemoryTransport::pair();
        let a_id = Keypair::generate();
        let b_id = Keypair::generate();
        let someone_else = Keypair::generate().public_key();

        let expect = ExpectPeer(someone_else);
        let (ra, rb) = tokio::join!(
            a.handshake(&a_id, &expect),
            b.handshake(&b_id, &AcceptAll)
        );

        assert!(matches!(ra, Err(NetError::AuthenticationRejected(_))));
        // B may or may not finish its side before A hangs up.
        let _ = rb;
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert_eq!(a.remote_public_key(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_wakes_waiters() {
        let (a, b) = connected(&Keypair::generate(), &Keypair::generate()).await;

        let waiter = tokio::spawn(async move {
            b.closed().await;
            b.recv().await.unwrap()
        });

        a.close();
        a.close();

        let frame = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(frame.is_none());
        assert!(matches!(
            a.send(ONE_TIME_FEED, Bytes::new()).await,
            Err(NetError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_one_end_closes_the_other() {
        let (a, b) = MemoryTransport::pair();
        drop(a);
        assert!(b.is_closed());
    }
}
