//! Proptest generators for property-based testing.

use proptest::prelude::*;

use feedmarket_core::{Ed25519PublicKey, GrantInfo, Keypair};

use crate::fixtures::Step;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate grant info with up to three fields.
pub fn grant_info() -> impl Strategy<Value = GrantInfo> {
    prop::collection::btree_map("[a-z_]{1,12}", "[a-z0-9]{0,16}", 0..=3)
        .prop_map(|fields| fields.into_iter().collect::<GrantInfo>())
}

/// Generate a denial reason.
pub fn reason() -> impl Strategy<Value = String> {
    "[a-z][a-z ]{0,23}".prop_map(String::from)
}

/// Generate a step that answers: a grant, with or without info, or a denial.
pub fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        prop::option::of(grant_info()).prop_map(Step::Grant),
        reason().prop_map(Step::Deny),
    ]
}

/// Generate an entitlement script of up to `max_len` answering steps.
pub fn script(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step(), 1..=max_len.max(1))
}
