//! Error types for markets and sessions.

use feedmarket_core::CoreError;
use feedmarket_net::NetError;
use feedmarket_store::StoreError;
use thiserror::Error;

/// Errors that can occur during market operations.
#[derive(Debug, Error)]
pub enum MarketError {
    /// An identity key pair could not be loaded or created.
    ///
    /// Fatal to the object that owns the identity.
    #[error("identity {key} unavailable: {source}")]
    Identity {
        key: String,
        #[source]
        source: StoreError,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Transport or feed error.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// Record or key material error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The remote peer is not the expected seller.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The transport closed while a unique feed was being provisioned.
    #[error("stream closed")]
    StreamClosed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MarketError {
    /// Whether this error only reports that the transport went away.
    pub(crate) fn is_closure(&self) -> bool {
        matches!(self, MarketError::Net(NetError::Closed))
    }
}

/// Result type for market operations.
pub type Result<T> = std::result::Result<T, MarketError>;
