//! # Feedmarket Access
//!
//! Entitlement checks and the per-connection validation state machine.
//!
//! ## Overview
//!
//! A seller decides who may download through an [`Entitlement`]: arbitrary,
//! possibly slow business logic that answers "does this peer currently have
//! paid access?". Sellers re-ask the question on a fixed interval for the
//! life of every connection. The [`ValidationMachine`] folds the stream of
//! answers into state *transitions*, so grant and deny notifications go out
//! once per change instead of once per check.
//!
//! ## Key Concepts
//!
//! - **Entitlement**: seller-supplied check; `Err` means denied, the error's
//!   message is the reason shown to the buyer
//! - **Transition**: a change of [`ValidationState`]; the only thing that
//!   toggles uploading or produces wire traffic
//! - **Subscription ledger**: a ready-made entitlement backed by per-buyer
//!   subscriptions with expiry and revocation
//!
//! ## State Machine
//!
//! ```text
//!                 granted               denied
//!  Unvalidated ───────────► Valid ◄──────────────► Invalid
//!       │                                            ▲
//!       └────────────────── denied ──────────────────┘
//! ```
//!
//! There is no terminal state; the machine lives as long as the connection.

pub mod entitlement;
pub mod error;
pub mod state;
pub mod subscription;

pub use entitlement::{entitlement_fn, AllowAll, Entitlement, FnEntitlement};
pub use error::{AccessError, Result};
pub use state::{CheckOutcome, Transition, ValidationMachine, ValidationState};
pub use subscription::{Subscription, SubscriptionLedger};
