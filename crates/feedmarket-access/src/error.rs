//! Error types for the access module.

use thiserror::Error;

/// Errors raised by entitlement checks.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Access denied. Displays as the bare reason, which is what the buyer sees.
    #[error("{0}")]
    Denied(String),

    /// The buyer has no subscription on record.
    #[error("no subscription")]
    NoSubscription,

    /// The subscription was revoked by the seller.
    #[error("revoked")]
    Revoked,

    /// The subscription ran out.
    #[error("expired")]
    Expired,
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
