//! Market extension messages.
//!
//! Three named channels ride alongside feed replication on every market
//! connection. Framing is the transport's business; this module only maps
//! messages to channel payloads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use feedmarket_core::{decode_record, encode_record, Ed25519PublicKey, GrantInfo};

use crate::error::{NetError, Result};

/// Carries the buyer's unique feed key as raw bytes, once per connection.
pub const ONE_TIME_FEED: &str = "one-time-feed";
/// Carries grant info when the buyer becomes entitled.
pub const VALID: &str = "valid";
/// Carries the denial reason when the buyer loses entitlement.
pub const INVALID: &str = "invalid";

/// Payload encoding negotiated when an extension is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Raw bytes, passed through untouched.
    Binary,
    /// A structured field-name to value record (CBOR).
    Cbor,
}

/// Name and encoding of one extension channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionSpec {
    pub name: &'static str,
    pub encoding: Encoding,
}

/// Every channel a market session registers before the handshake.
pub const MARKET_EXTENSIONS: [ExtensionSpec; 3] = [
    ExtensionSpec {
        name: ONE_TIME_FEED,
        encoding: Encoding::Binary,
    },
    ExtensionSpec {
        name: VALID,
        encoding: Encoding::Cbor,
    },
    ExtensionSpec {
        name: INVALID,
        encoding: Encoding::Cbor,
    },
];

/// Payload of the `invalid` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidPayload {
    pub error: String,
}

/// A decoded market control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionMessage {
    /// The unique feed the seller provisioned for this buyer.
    OneTimeFeed(Ed25519PublicKey),
    /// Entitlement granted, with the check's auxiliary info.
    Valid(GrantInfo),
    /// Entitlement denied.
    Invalid { error: String },
}

impl ExtensionMessage {
    /// The channel this message travels on.
    pub fn channel(&self) -> &'static str {
        match self {
            ExtensionMessage::OneTimeFeed(_) => ONE_TIME_FEED,
            ExtensionMessage::Valid(_) => VALID,
            ExtensionMessage::Invalid { .. } => INVALID,
        }
    }

    /// Encode the channel payload.
    pub fn encode(&self) -> Result<Bytes> {
        let bytes = match self {
            ExtensionMessage::OneTimeFeed(key) => key.as_bytes().to_vec(),
            ExtensionMessage::Valid(info) => encode_record(info)?,
            ExtensionMessage::Invalid { error } => encode_record(&InvalidPayload {
                error: error.clone(),
            })?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Decode a payload received on `channel`.
    pub fn decode(channel: &str, payload: &[u8]) -> Result<Self> {
        let invalid = |reason: String| NetError::InvalidPayload {
            channel: channel.to_string(),
            reason,
        };

        match channel {
            ONE_TIME_FEED => Ed25519PublicKey::from_slice(payload)
                .map(ExtensionMessage::OneTimeFeed)
                .map_err(|_| invalid(format!("expected 32 bytes, got {}", payload.len()))),
            VALID => decode_record(payload)
                .map(ExtensionMessage::Valid)
                .map_err(|e| invalid(e.to_string())),
            INVALID => decode_record::<InvalidPayload>(payload)
                .map(|p| ExtensionMessage::Invalid { error: p.error })
                .map_err(|e| invalid(e.to_string())),
            other => Err(NetError::UnknownExtension(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_one_time_feed_is_raw_key_bytes() {
        let key = Ed25519PublicKey::from_bytes([0x5a; 32]);
        let msg = ExtensionMessage::OneTimeFeed(key);

        let payload = msg.encode().unwrap();
        assert_eq!(&payload[..], key.as_bytes());
        assert_eq!(ExtensionMessage::decode(ONE_TIME_FEED, &payload).unwrap(), msg);
    }

    #[test]
    fn test_invalid_carries_error_field() {
        let msg = ExtensionMessage::Invalid {
            error: "expired".into(),
        };
        let payload = msg.encode().unwrap();

        let raw: InvalidPayload = decode_record(&payload).unwrap();
        assert_eq!(raw.error, "expired");
        assert_eq!(ExtensionMessage::decode(INVALID, &payload).unwrap(), msg);
    }

    #[test]
    fn test_valid_carries_info() {
        let info = GrantInfo::new().with("plan", "annual");
        let msg = ExtensionMessage::Valid(info.clone());
        let payload = msg.encode().unwrap();
        assert_eq!(
            ExtensionMessage::decode(VALID, &payload).unwrap(),
            ExtensionMessage::Valid(info)
        );
    }

    #[test]
    fn test_truncated_feed_key_rejected() {
        let err = ExtensionMessage::decode(ONE_TIME_FEED, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, NetError::InvalidPayload { .. }));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let err = ExtensionMessage::decode("chat", b"hi").unwrap_err();
        assert!(matches!(err, NetError::UnknownExtension(name) if name == "chat"));
    }

    #[test]
    fn test_channel_names_match_registrations() {
        let names: Vec<_> = MARKET_EXTENSIONS.iter().map(|s| s.name).collect();
        for msg in [
            ExtensionMessage::OneTimeFeed(Ed25519PublicKey::from_bytes([0; 32])),
            ExtensionMessage::Valid(GrantInfo::new()),
            ExtensionMessage::Invalid { error: String::new() },
        ] {
            assert!(names.contains(&msg.channel()));
        }
    }

    fn any_message() -> impl Strategy<Value = ExtensionMessage> {
        prop_oneof![
            any::<[u8; 32]>().prop_map(|b| ExtensionMessage::OneTimeFeed(b.into())),
            prop::collection::btree_map("[a-z_]{1,8}", ".{0,12}", 0..4)
                .prop_map(|fields| ExtensionMessage::Valid(fields.into_iter().collect())),
            ".{0,40}".prop_map(|error| ExtensionMessage::Invalid { error }),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode_on_its_channel(msg in any_message()) {
            let payload = msg.encode().unwrap();
            let decoded = ExtensionMessage::decode(msg.channel(), &payload).unwrap();
            prop_assert_eq!(decoded, msg);
        }
    }
}
