//! # Feedmarket Testkit
//!
//! Testing utilities for feedmarket.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Mock feeds**: [`MockFeed`] records every replicate, upload toggle and
//!   close; [`MockFeedFactory`] derives and opens them deterministically
//! - **Scripted entitlements**: [`ScriptedEntitlement`] answers checks from a
//!   pre-programmed script
//! - **Fault injection**: [`FailingStore`] fails writes under a key prefix
//! - **Generators**: Proptest strategies for keys, grant info and scripts
//!
//! ## Test Fixtures
//!
//! ```rust
//! use feedmarket_testkit::{MockFeedFactory, ScriptedEntitlement, Step};
//!
//! let factory = MockFeedFactory::new();
//! let entitlement = ScriptedEntitlement::new(
//!     [Step::grant(), Step::deny("expired")],
//!     Step::Hang,
//! );
//! assert_eq!(factory.derivations(), 0);
//! assert_eq!(entitlement.calls(), 0);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use feedmarket_testkit::generators::script;
//!
//! proptest! {
//!     #[test]
//!     fn uploads_follow_transitions(steps in script(16)) {
//!         // drive a seller session through `steps`
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{FailingStore, MockFeed, MockFeedFactory, ScriptedEntitlement, Step};
