//! Error types for the net module.

use thiserror::Error;

/// Errors raised by transports, extension codecs and feed handles.
#[derive(Debug, Error)]
pub enum NetError {
    /// The transport has been torn down.
    #[error("stream closed")]
    Closed,

    /// The remote peer failed to prove ownership of its key.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The local authenticator refused the remote peer.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// The peer sent a frame out of protocol order.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Extension registration after the handshake started.
    #[error("extension {0} registered after handshake")]
    LateRegistration(String),

    /// Send on an extension that was never registered.
    #[error("unknown extension: {0}")]
    UnknownExtension(String),

    /// Extension payload could not be encoded or decoded.
    #[error("invalid extension payload on {channel}: {reason}")]
    InvalidPayload { channel: String, reason: String },

    /// Error from the replication engine.
    #[error("feed error: {0}")]
    Feed(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] feedmarket_core::CoreError),
}

/// Result type for net operations.
pub type Result<T> = std::result::Result<T, NetError>;
