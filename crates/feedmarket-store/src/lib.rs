//! # Feedmarket Store
//!
//! Storage abstraction for feedmarket. Provides a trait-based key-value
//! interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! Markets persist identity key pairs, sale and buy records, and per-buyer
//! capability records. All of it lives behind the [`KvStore`] trait so the
//! protocol code is storage-agnostic. The primary implementation is
//! [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`KvStore`] - The async trait for raw key-value operations
//! - [`KvStoreExt`] - Typed record helpers on top of [`KvStore`]
//! - [`PrefixCursor`] - Batched iteration over a key prefix
//! - [`PutResult`] - Outcome of a create-if-absent write
//!
//! ## Usage
//!
//! ```rust,no_run
//! use feedmarket_store::{KvStoreExt, SqliteStore};
//! use feedmarket_core::{keys, Keypair, KeyPairRecord};
//!
//! async fn example() {
//!     let store = SqliteStore::open("market.db").unwrap();
//!
//!     let identity: KeyPairRecord = store
//!         .get_or_insert_record(&keys::market_identity(), || {
//!             KeyPairRecord::from_keypair(&Keypair::generate())
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Create-if-absent**: `put_if_absent` never overwrites; concurrent
//!   first writers converge on whichever value landed first.
//! - **Read-after-write**: a completed `put` is visible to every later `get`.
//! - **Ordering**: prefix scans return keys in byte order, but callers must not
//!   rely on insertion order.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{KvStore, KvStoreExt, PrefixCursor, PutResult};
