//! Cryptographic primitives for feedmarket.
//!
//! Wraps Ed25519 signing and Blake3 keyed hashing with strong types. Key
//! material serializes as hex strings so persisted records stay readable.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{CoreError, Result};

/// Context string for discovery key derivation.
const DISCOVERY_CONTEXT: &[u8] = b"feedmarket discovery";

fn decode_hex_array<const N: usize>(s: &str) -> std::result::Result<[u8; N], hex::FromHexError> {
    let mut arr = [0u8; N];
    hex::decode_to_slice(s, &mut arr)?;
    Ok(arr)
}

fn deserialize_hex_array<'de, D, const N: usize>(deserializer: D) -> std::result::Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    decode_hex_array(&s).map_err(serde::de::Error::custom)
}

/// A 32-byte Ed25519 public key.
///
/// Identifies peers (market, seller, buyer identities) and feeds alike.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        decode_hex_array(s).map(Self)
    }

    /// Parse from a byte slice, as received on the wire.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    /// Derive the discovery key for a feed identified by this key.
    pub fn discovery_key(&self) -> DiscoveryKey {
        DiscoveryKey(*blake3::keyed_hash(&self.0, DISCOVERY_CONTEXT).as_bytes())
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<()> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;

        let sig = Signature::from_bytes(&signature.0);

        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Ed25519PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Ed25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Ed25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Ed25519PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserialize_hex_array(deserializer).map(Self)
    }
}

/// A 64-byte Ed25519 secret key: the 32-byte seed followed by the public key.
#[derive(Clone, PartialEq, Eq)]
pub struct Ed25519SecretKey([u8; 64]);

impl Ed25519SecretKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Ed25519SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ed25519Secret(..)")
    }
}

impl Serialize for Ed25519SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Ed25519SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserialize_hex_array(deserializer).map(Self)
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(pub [u8; 64]);

impl Ed25519Signature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Sig({}...)", &self.to_hex()[..16])
    }
}

/// A 32-byte discovery key.
///
/// Derived from a feed's public key; safe to announce when looking for peers
/// because it does not reveal the feed key itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryKey(pub [u8; 32]);

impl DiscoveryKey {
    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Discovery({})", &self.to_hex()[..16])
    }
}

/// An identity key pair.
///
/// This wraps ed25519-dalek's SigningKey.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Rebuild from a 64-byte secret key.
    ///
    /// Fails if the public half embedded in the secret does not match the seed.
    pub fn from_secret_key(secret: &Ed25519SecretKey) -> Result<Self> {
        let signing_key = SigningKey::from_keypair_bytes(secret.as_bytes()).map_err(|_| {
            CoreError::KeyMismatch(hex::encode(&secret.as_bytes()[32..]))
        })?;
        Ok(Self { signing_key })
    }

    /// Get the public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Get the 64-byte secret key.
    pub fn secret_key(&self) -> Ed25519SecretKey {
        Ed25519SecretKey(self.signing_key.to_keypair_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sig = self.signing_key.sign(message);
        Ed25519Signature(sig.to_bytes())
    }
}

impl PartialEq for Keypair {
    fn eq(&self, other: &Self) -> bool {
        self.signing_key.to_keypair_bytes() == other.signing_key.to_keypair_bytes()
    }
}

impl Eq for Keypair {}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_sign_verify() {
        let keypair = Keypair::generate();
        let message = b"hello world";
        let signature = keypair.sign(message);

        keypair
            .public_key()
            .verify(message, &signature)
            .expect("valid signature should verify");

        let tampered = b"hello worlD";
        assert!(keypair.public_key().verify(tampered, &signature).is_err());
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let seed = [0x42u8; 32];
        let kp1 = Keypair::from_seed(&seed);
        let kp2 = Keypair::from_seed(&seed);
        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn test_secret_key_restores_keypair() {
        let keypair = Keypair::generate();
        let secret = keypair.secret_key();
        assert_eq!(&secret.as_bytes()[32..], keypair.public_key().as_bytes());

        let restored = Keypair::from_secret_key(&secret).unwrap();
        assert_eq!(restored, keypair);
    }

    #[test]
    fn test_secret_key_with_foreign_public_half_rejected() {
        let a = Keypair::generate();
        let b = Keypair::generate();

        let mut bytes = *a.secret_key().as_bytes();
        bytes[32..].copy_from_slice(b.public_key().as_bytes());

        let err = Keypair::from_secret_key(&Ed25519SecretKey::from_bytes(bytes)).unwrap_err();
        assert!(matches!(err, CoreError::KeyMismatch(_)));
    }

    #[test]
    fn test_discovery_key_is_stable_and_distinct() {
        let pk = Keypair::from_seed(&[7u8; 32]).public_key();
        assert_eq!(pk.discovery_key(), pk.discovery_key());
        assert_ne!(pk.discovery_key().as_bytes(), pk.as_bytes());

        let other = Keypair::from_seed(&[8u8; 32]).public_key();
        assert_ne!(pk.discovery_key(), other.discovery_key());
    }

    #[test]
    fn test_public_key_serializes_as_hex() {
        let pk = Ed25519PublicKey::from_bytes([0xab; 32]);
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));

        let back: Ed25519PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }

    #[test]
    fn test_public_key_from_slice_rejects_short_input() {
        assert!(Ed25519PublicKey::from_slice(&[1u8; 31]).is_err());
        assert!(Ed25519PublicKey::from_slice(&[1u8; 32]).is_ok());
    }

    #[test]
    fn test_secret_key_debug_is_redacted() {
        let secret = Keypair::generate().secret_key();
        assert_eq!(format!("{:?}", secret), "Ed25519Secret(..)");
    }
}
