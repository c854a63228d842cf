//! Persisted records and their key layout.
//!
//! Every value in the key-value store is one of these records, encoded as a
//! CBOR map. Key material inside a record is a hex string.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::{Ed25519PublicKey, Ed25519SecretKey, Keypair};
use crate::error::{CoreError, Result};

/// Encode a record to CBOR bytes.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

/// Decode a record from CBOR bytes.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}

/// A persisted identity key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairRecord {
    pub public_key: Ed25519PublicKey,
    pub secret_key: Ed25519SecretKey,
}

impl KeyPairRecord {
    pub fn from_keypair(keypair: &Keypair) -> Self {
        Self {
            public_key: keypair.public_key(),
            secret_key: keypair.secret_key(),
        }
    }

    /// Rebuild the key pair, checking both halves agree.
    pub fn to_keypair(&self) -> Result<Keypair> {
        let keypair = Keypair::from_secret_key(&self.secret_key)?;
        if keypair.public_key() != self.public_key {
            return Err(CoreError::KeyMismatch(self.public_key.to_hex()));
        }
        Ok(keypair)
    }
}

/// Buyer side: the unique feed a seller issued to this market.
///
/// Written once, on first receipt of a one-time feed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyRecord {
    pub seller: Ed25519PublicKey,
    pub feed: Ed25519PublicKey,
}

/// Seller side: marks a master feed as offered for sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub feed: Ed25519PublicKey,
}

/// Seller side: the capability key pair issued to one buyer for one master feed.
///
/// Immutable once written. The same buyer always receives the same derived feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRecord {
    pub buyer: Ed25519PublicKey,
    pub key_pair: KeyPairRecord,
}

/// Store key layout.
pub mod keys {
    use crate::crypto::Ed25519PublicKey;

    /// Prefix of buyer-side [`BuyRecord`](super::BuyRecord)s.
    pub const BUYS_PREFIX: &str = "buys/feeds/";
    /// Prefix of seller-side [`SaleRecord`](super::SaleRecord)s.
    pub const SALES_PREFIX: &str = "sales/";
    /// Prefix of seller-side [`CapabilityRecord`](super::CapabilityRecord)s.
    pub const CAPABILITIES_PREFIX: &str = "capabilities/";

    /// The market's own buyer identity.
    pub fn market_identity() -> String {
        "identity/market".to_string()
    }

    /// The seller identity for a master feed.
    pub fn seller_identity(feed: &Ed25519PublicKey) -> String {
        format!("identity/sales/{}", feed.to_hex())
    }

    pub fn sale(feed: &Ed25519PublicKey) -> String {
        format!("{}{}", SALES_PREFIX, feed.to_hex())
    }

    pub fn buy(seller: &Ed25519PublicKey) -> String {
        format!("{}{}", BUYS_PREFIX, seller.to_hex())
    }

    pub fn capability(master: &Ed25519PublicKey, buyer: &Ed25519PublicKey) -> String {
        format!("{}{}/{}", CAPABILITIES_PREFIX, master.to_hex(), buyer.to_hex())
    }
}
