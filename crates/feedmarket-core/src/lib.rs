//! # Feedmarket Core
//!
//! Pure primitives for feedmarket: identity key pairs, discovery keys, and the
//! records persisted by markets, sellers, and buyers.
//!
//! This crate contains no I/O, no storage, no networking. It is pure computation
//! over key material and record encodings.
//!
//! ## Key Types
//!
//! - [`Keypair`] - An Ed25519 identity (32-byte public key, 64-byte secret key)
//! - [`Ed25519PublicKey`] - Identifies peers and feeds
//! - [`DiscoveryKey`] - Public, non-secret topic identifier derived from a feed key
//! - [`GrantInfo`] - Auxiliary info returned by a successful entitlement check
//!
//! ## Records
//!
//! Persisted values are CBOR maps whose byte fields are hex strings. See the
//! [`record`] module for the record types and the [`record::keys`] layout.

pub mod crypto;
pub mod error;
pub mod record;
pub mod types;

pub use crypto::{DiscoveryKey, Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature, Keypair};
pub use error::{CoreError, Result};
pub use record::{
    decode_record, encode_record, keys, BuyRecord, CapabilityRecord, KeyPairRecord, SaleRecord,
};
pub use types::GrantInfo;
