//! # Feedmarket
//!
//! Paid access to replicated feeds. A seller offers a feed and re-checks
//! every connected buyer's entitlement on a fixed interval; buyers receive a
//! feed derived just for them and replicate it while they are entitled.
//!
//! ## Overview
//!
//! - **Market**: owns the buyer identity, the key store and the persisted
//!   buy and sell records
//! - **Seller**: a master feed plus an entitlement check; one
//!   [`SellerSession`] per connection
//! - **Buyer**: an expected seller key; one [`BuyerSession`] per connection
//!
//! ## Key Concepts
//!
//! - **Unique feed**: a capability-restricted view of the master feed. Each
//!   buyer gets exactly one, stable across reconnects.
//! - **Revalidation**: the seller's entitlement check runs after the
//!   handshake and again one interval after each check completes. Uploading
//!   on the unique feed follows the most recent result.
//! - **Transitions**: grant and deny messages go out once per change of
//!   validation state, never once per check.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use feedmarket::access::AllowAll;
//! use feedmarket::net::{FeedDeriver, FeedHandle, MemoryTransport};
//! use feedmarket::store::SqliteStore;
//! use feedmarket::{Market, MarketConfig, SessionEvent};
//!
//! async fn example(master: FeedHandle, deriver: Arc<dyn FeedDeriver>) {
//!     let store = Arc::new(SqliteStore::open("market.db").unwrap());
//!     let market = Market::open(store, MarketConfig::default()).await.unwrap();
//!
//!     let seller = market
//!         .seller(master, deriver, Arc::new(AllowAll))
//!         .await
//!         .unwrap();
//!
//!     // One session per incoming connection.
//!     let (transport, _remote) = MemoryTransport::pair();
//!     let (session, mut events) = seller.sell(Arc::new(transport));
//!     let task = session.spawn();
//!
//!     while let Some(event) = events.recv().await {
//!         if let SessionEvent::Denied(reason) = event {
//!             println!("buyer lost access: {reason}");
//!         }
//!     }
//!     task.await.unwrap().unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `feedmarket::core` - Key pairs, records, grant info
//! - `feedmarket::store` - Key-value store trait, SQLite and in-memory backends
//! - `feedmarket::net` - Transport, extension messages, feed handle traits
//! - `feedmarket::access` - Entitlement checks and the validation state machine

pub mod buyer;
pub mod config;
pub mod error;
pub mod keystore;
pub mod market;
pub mod provision;
pub mod registry;
pub mod seller;
pub mod session;
mod validation;

// Re-export component crates
pub use feedmarket_access as access;
pub use feedmarket_core as core;
pub use feedmarket_net as net;
pub use feedmarket_store as store;

// Re-export main types for convenience
pub use buyer::{Buyer, BuyerSession};
pub use config::MarketConfig;
pub use error::{MarketError, Result};
pub use keystore::KeyStore;
pub use market::Market;
pub use provision::UniqueFeedProvisioner;
pub use registry::{Buying, Registry, Selling};
pub use seller::{Seller, SellerSession};
pub use session::{SessionEvent, SessionEvents};

pub use feedmarket_access::{Entitlement, ValidationState};
pub use feedmarket_core::{Ed25519PublicKey, GrantInfo, Keypair};
