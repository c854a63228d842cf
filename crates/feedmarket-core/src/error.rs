//! Error types for feedmarket core.

use thiserror::Error;

/// Core errors that can occur while handling keys and records.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("secret key does not match public key {0}")]
    KeyMismatch(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
