//! Subscription-backed entitlement.
//!
//! A small in-process ledger of who paid and until when. Sellers with a
//! real billing backend implement [`Entitlement`] directly instead.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use feedmarket_core::{Ed25519PublicKey, GrantInfo};

use crate::entitlement::Entitlement;
use crate::error::AccessError;

/// Source of the current time, in Unix milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One buyer's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub buyer: Ed25519PublicKey,
    pub plan: Option<String>,
    /// Unix millis; `None` never expires.
    pub expires_at: Option<i64>,
    pub revoked: bool,
    pub started_at: i64,
}

impl Subscription {
    /// Whether the subscription grants access at `now`.
    pub fn is_valid(&self, now: i64) -> bool {
        !self.revoked && self.expires_at.map_or(true, |exp| now < exp)
    }

    fn status(&self, now: i64) -> Result<(), AccessError> {
        if self.revoked {
            return Err(AccessError::Revoked);
        }
        match self.expires_at {
            Some(exp) if now >= exp => Err(AccessError::Expired),
            _ => Ok(()),
        }
    }

    fn grant_info(&self) -> Option<GrantInfo> {
        let mut info = GrantInfo::new();
        if let Some(plan) = &self.plan {
            info.insert("plan", plan.clone());
        }
        if let Some(exp) = self.expires_at {
            info.insert("expires_at", exp.to_string());
        }
        (!info.is_empty()).then_some(info)
    }
}

/// In-memory subscription ledger.
///
/// Denials carry the reasons `no subscription`, `revoked` and `expired`.
/// Grants carry the plan and expiry, when set, as grant info.
pub struct SubscriptionLedger {
    subscriptions: RwLock<HashMap<Ed25519PublicKey, Subscription>>,
    clock: Clock,
}

impl Default for SubscriptionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionLedger {
    /// Create a ledger using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(system_clock))
    }

    /// Create a ledger reading time from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Record a subscription for `buyer`, replacing any previous one.
    pub fn subscribe(
        &self,
        buyer: Ed25519PublicKey,
        plan: Option<String>,
        expires_at: Option<i64>,
    ) -> Subscription {
        let sub = Subscription {
            buyer,
            plan,
            expires_at,
            revoked: false,
            started_at: self.now(),
        };
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(buyer, sub.clone());
        debug!(buyer = %buyer, "subscription recorded");
        sub
    }

    /// Move the expiry of an existing subscription. Returns false if none.
    pub fn renew(&self, buyer: &Ed25519PublicKey, expires_at: Option<i64>) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match subs.get_mut(buyer) {
            Some(sub) => {
                sub.expires_at = expires_at;
                sub.revoked = false;
                true
            }
            None => false,
        }
    }

    /// Revoke an existing subscription. Returns false if none.
    pub fn revoke(&self, buyer: &Ed25519PublicKey) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match subs.get_mut(buyer) {
            Some(sub) => {
                sub.revoked = true;
                debug!(buyer = %buyer, "subscription revoked");
                true
            }
            None => false,
        }
    }

    /// Look up a buyer's subscription.
    pub fn get(&self, buyer: &Ed25519PublicKey) -> Option<Subscription> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(buyer)
            .cloned()
    }
}

#[async_trait]
impl Entitlement for SubscriptionLedger {
    async fn check(&self, remote: &Ed25519PublicKey) -> anyhow::Result<Option<GrantInfo>> {
        let sub = self.get(remote).ok_or(AccessError::NoSubscription)?;
        sub.status(self.now())?;
        Ok(sub.grant_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn ledger_at(now: Arc<AtomicI64>) -> SubscriptionLedger {
        SubscriptionLedger::with_clock(Arc::new(move || now.load(Ordering::SeqCst)))
    }

    fn buyer(n: u8) -> Ed25519PublicKey {
        Ed25519PublicKey::from_bytes([n; 32])
    }

    #[tokio::test]
    async fn test_unknown_buyer_is_denied() {
        let ledger = SubscriptionLedger::new();
        let err = ledger.check(&buyer(1)).await.unwrap_err();
        assert_eq!(err.to_string(), "no subscription");
    }

    #[tokio::test]
    async fn test_open_ended_subscription_grants_without_info() {
        let ledger = SubscriptionLedger::new();
        ledger.subscribe(buyer(1), None, None);
        assert_eq!(ledger.check(&buyer(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_grant_info_carries_plan_and_expiry() {
        let now = Arc::new(AtomicI64::new(1_000));
        let ledger = ledger_at(now);
        ledger.subscribe(buyer(2), Some("monthly".into()), Some(5_000));

        let info = ledger.check(&buyer(2)).await.unwrap().unwrap();
        assert_eq!(info.get("plan"), Some("monthly"));
        assert_eq!(info.get("expires_at"), Some("5000"));
    }

    #[tokio::test]
    async fn test_expiry_and_renewal() {
        let now = Arc::new(AtomicI64::new(1_000));
        let ledger = ledger_at(now.clone());
        ledger.subscribe(buyer(3), None, Some(2_000));
        assert!(ledger.check(&buyer(3)).await.is_ok());

        now.store(2_000, Ordering::SeqCst);
        let err = ledger.check(&buyer(3)).await.unwrap_err();
        assert_eq!(err.to_string(), "expired");
        assert!(!ledger.get(&buyer(3)).unwrap().is_valid(2_000));

        assert!(ledger.renew(&buyer(3), Some(10_000)));
        assert!(ledger.check(&buyer(3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_wins_over_expiry() {
        let ledger = SubscriptionLedger::new();
        ledger.subscribe(buyer(4), None, None);
        assert!(ledger.revoke(&buyer(4)));

        let err = ledger.check(&buyer(4)).await.unwrap_err();
        assert_eq!(err.to_string(), "revoked");
        assert!(!ledger.revoke(&buyer(5)));
        assert!(!ledger.renew(&buyer(5), None));
    }
}
