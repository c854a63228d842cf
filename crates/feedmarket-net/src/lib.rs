//! # Feedmarket Net
//!
//! The collaborator interfaces the access-control protocol runs over: an
//! authenticated transport carrying named extension channels, and handles
//! to replicated feeds.
//!
//! ## Overview
//!
//! The secure transport, the feed replication engine and the feed
//! derivation primitive live outside feedmarket. This crate pins down the
//! contracts the market sessions need from them, and ships an in-memory
//! transport used by tests and in-process deployments.
//!
//! ## Key Types
//!
//! - [`Transport`] - Authenticated bidirectional stream with extension channels
//! - [`MemoryTransport`] - Linked in-process transport pair
//! - [`ExtensionMessage`] - The three market control messages
//! - [`Feed`], [`FeedDeriver`], [`FeedOpener`] - Replication engine handles
//!
//! ## Extension Channels
//!
//! ```text
//! Seller                                   Buyer
//!   |======== handshake (keys, proofs) ======|
//!   |-------- one-time-feed (raw key) ------>|   once, before replication
//!   |-------- valid {info} ----------------->|   on transition to valid
//!   |-------- invalid {error} -------------->|   on transition to invalid
//!   |<======= feed replication =============>|
//! ```

pub mod error;
pub mod feed;
pub mod messages;
pub mod transport;

pub use error::{NetError, Result};
pub use feed::{Feed, FeedDeriver, FeedHandle, FeedOpener, ReplicateOptions};
pub use messages::{
    Encoding, ExtensionMessage, ExtensionSpec, InvalidPayload, INVALID, MARKET_EXTENSIONS,
    ONE_TIME_FEED, VALID,
};
pub use transport::{
    memory::MemoryTransport, AcceptAll, Authenticator, ExpectPeer, ExtensionFrame, Transport,
};
