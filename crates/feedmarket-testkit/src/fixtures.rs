//! Test fixtures and helpers.
//!
//! In-process stand-ins for the replication engine, the seller's billing
//! logic and a misbehaving store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use feedmarket_access::Entitlement;
use feedmarket_core::{Ed25519PublicKey, GrantInfo, Keypair};
use feedmarket_net::{
    Feed, FeedDeriver, FeedHandle, FeedOpener, ReplicateOptions, Result as NetResult, Transport,
};
use feedmarket_store::{KvStore, PutResult, Result as StoreResult, StoreError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// Feeds
// ─────────────────────────────────────────────────────────────────────────────

/// A feed that records what the market asks of it.
pub struct MockFeed {
    public_key: Ed25519PublicKey,
    replications: Mutex<Vec<ReplicateOptions>>,
    uploads: Mutex<Vec<bool>>,
    closes: AtomicUsize,
    /// `replicate` waits while this reads false.
    replication_gate: Option<watch::Receiver<bool>>,
}

impl MockFeed {
    pub fn new(public_key: Ed25519PublicKey) -> Self {
        Self {
            public_key,
            replications: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            replication_gate: None,
        }
    }

    /// A feed with a fresh random key.
    pub fn random() -> Self {
        Self::new(Keypair::generate().public_key())
    }

    /// Options of every `replicate` call, in order.
    pub fn replications(&self) -> Vec<ReplicateOptions> {
        lock(&self.replications).clone()
    }

    /// Every `set_uploading` argument, in order.
    pub fn upload_history(&self) -> Vec<bool> {
        lock(&self.uploads).clone()
    }

    /// The last upload toggle; feeds start not uploading.
    pub fn is_uploading(&self) -> bool {
        lock(&self.uploads).last().copied().unwrap_or(false)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Feed for MockFeed {
    fn public_key(&self) -> Ed25519PublicKey {
        self.public_key
    }

    async fn ready(&self) -> NetResult<()> {
        Ok(())
    }

    async fn replicate(&self, _transport: Arc<dyn Transport>, options: ReplicateOptions) -> NetResult<()> {
        if let Some(gate) = &self.replication_gate {
            let _ = gate.clone().wait_for(|open| *open).await;
        }
        lock(&self.replications).push(options);
        Ok(())
    }

    fn set_uploading(&self, uploading: bool) {
        lock(&self.uploads).push(uploading);
    }

    async fn close(&self) -> NetResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Derives and opens [`MockFeed`]s.
///
/// A derived feed's key is the capability's public key, so derivation is
/// deterministic. Every handle handed out is kept for inspection.
pub struct MockFeedFactory {
    feeds: Mutex<Vec<Arc<MockFeed>>>,
    derivations: watch::Sender<usize>,
    opens: AtomicUsize,
    /// Derivations wait while this is false.
    gate: watch::Sender<bool>,
    replication_gate: watch::Sender<bool>,
}

impl Default for MockFeedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFeedFactory {
    pub fn new() -> Self {
        Self {
            feeds: Mutex::new(Vec::new()),
            derivations: watch::channel(0).0,
            opens: AtomicUsize::new(0),
            gate: watch::channel(true).0,
            replication_gate: watch::channel(true).0,
        }
    }

    /// Make derivations block until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Make `replicate` on every handle from this factory block until
    /// [`resume_replication`](Self::resume_replication).
    pub fn stall_replication(&self) {
        self.replication_gate.send_replace(false);
    }

    pub fn resume_replication(&self) {
        self.replication_gate.send_replace(true);
    }

    /// Number of derivations started, finished or not.
    pub fn derivations(&self) -> usize {
        *self.derivations.borrow()
    }

    /// Resolves once at least `n` derivations have started.
    pub async fn derivations_reached(&self, n: usize) {
        let mut rx = self.derivations.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every handle handed out, in order.
    pub fn all(&self) -> Vec<Arc<MockFeed>> {
        lock(&self.feeds).clone()
    }

    /// Every handle handed out for `key`.
    pub fn feeds(&self, key: &Ed25519PublicKey) -> Vec<Arc<MockFeed>> {
        lock(&self.feeds)
            .iter()
            .filter(|feed| feed.public_key == *key)
            .cloned()
            .collect()
    }

    /// The most recent handle for `key`.
    pub fn latest(&self, key: &Ed25519PublicKey) -> Option<Arc<MockFeed>> {
        self.feeds(key).pop()
    }

    fn issue(&self, key: Ed25519PublicKey) -> FeedHandle {
        let feed = Arc::new(MockFeed {
            replication_gate: Some(self.replication_gate.subscribe()),
            ..MockFeed::new(key)
        });
        lock(&self.feeds).push(Arc::clone(&feed));
        feed
    }
}

#[async_trait]
impl FeedDeriver for MockFeedFactory {
    async fn derive(&self, _master: &FeedHandle, capability: &Keypair) -> NetResult<FeedHandle> {
        self.derivations.send_modify(|count| *count += 1);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        Ok(self.issue(capability.public_key()))
    }
}

#[async_trait]
impl FeedOpener for MockFeedFactory {
    async fn open(&self, public_key: &Ed25519PublicKey) -> NetResult<FeedHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.issue(*public_key))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entitlement
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted entitlement answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Grant(Option<GrantInfo>),
    Deny(String),
    /// Never answer.
    Hang,
}

impl Step {
    pub fn grant() -> Self {
        Step::Grant(None)
    }

    pub fn grant_with(info: GrantInfo) -> Self {
        Step::Grant(Some(info))
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Step::Deny(reason.into())
    }

    pub fn is_grant(&self) -> bool {
        matches!(self, Step::Grant(_))
    }
}

/// Entitlement that plays back a script, then repeats a fallback step.
pub struct ScriptedEntitlement {
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    callers: Mutex<Vec<Ed25519PublicKey>>,
    calls: watch::Sender<usize>,
}

impl ScriptedEntitlement {
    pub fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: Mutex::new(fallback),
            callers: Mutex::new(Vec::new()),
            calls: watch::channel(0).0,
        }
    }

    /// Answer every check with `step`.
    pub fn always(step: Step) -> Self {
        Self::new([], step)
    }

    /// Append a step to the script.
    pub fn push(&self, step: Step) {
        lock(&self.script).push_back(step);
    }

    /// Replace the step used once the script runs out.
    pub fn set_fallback(&self, step: Step) {
        *lock(&self.fallback) = step;
    }

    /// Number of checks started.
    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    /// Remote keys of every check, in order.
    pub fn callers(&self) -> Vec<Ed25519PublicKey> {
        lock(&self.callers).clone()
    }

    /// Resolves once at least `n` checks have started.
    pub async fn calls_reached(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    fn next_step(&self) -> Step {
        match lock(&self.script).pop_front() {
            Some(step) => step,
            None => lock(&self.fallback).clone(),
        }
    }
}

#[async_trait]
impl Entitlement for ScriptedEntitlement {
    async fn check(&self, remote: &Ed25519PublicKey) -> anyhow::Result<Option<GrantInfo>> {
        lock(&self.callers).push(*remote);
        let step = self.next_step();
        self.calls.send_modify(|count| *count += 1);

        match step {
            Step::Grant(info) => Ok(info),
            Step::Deny(reason) => Err(anyhow::Error::msg(reason)),
            Step::Hang => std::future::pending().await,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps a store and fails writes to keys under a chosen prefix.
pub struct FailingStore<S> {
    inner: S,
    fail_prefix: Mutex<Option<String>>,
}

impl<S: KvStore> FailingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_prefix: Mutex::new(None),
        }
    }

    /// Fail every write to a key starting with `prefix`.
    pub fn fail_writes_under(&self, prefix: &str) {
        *lock(&self.fail_prefix) = Some(prefix.to_string());
    }

    /// Stop failing writes.
    pub fn heal(&self) {
        *lock(&self.fail_prefix) = None;
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check_write(&self, key: &str) -> StoreResult<()> {
        match lock(&self.fail_prefix).as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected write failure for {key}"),
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<S: KvStore> KvStore for FailingStore<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_write(key)?;
        self.inner.put(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> StoreResult<PutResult> {
        self.check_write(key)?;
        self.inner.put_if_absent(key, value).await
    }

    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.inner.list_prefix(prefix).await
    }

    async fn scan_after(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.inner.scan_after(prefix, after, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedmarket_store::MemoryStore;

    #[tokio::test]
    async fn test_mock_feed_records_calls() {
        let feed = MockFeed::random();
        feed.set_uploading(true);
        feed.set_uploading(false);
        feed.close().await.unwrap();

        assert_eq!(feed.upload_history(), vec![true, false]);
        assert!(!feed.is_uploading());
        assert_eq!(feed.close_count(), 1);
        assert!(feed.replications().is_empty());
    }

    #[tokio::test]
    async fn test_derivation_is_keyed_by_capability() {
        let factory = MockFeedFactory::new();
        let master: FeedHandle = Arc::new(MockFeed::random());
        let capability = Keypair::from_seed(&[4; 32]);

        let a = factory.derive(&master, &capability).await.unwrap();
        let b = factory.derive(&master, &capability).await.unwrap();
        assert_eq!(a.public_key(), capability.public_key());
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(factory.feeds(&capability.public_key()).len(), 2);
        assert_eq!(factory.derivations(), 2);
    }

    #[tokio::test]
    async fn test_held_derivation_waits_for_release() {
        let factory = Arc::new(MockFeedFactory::new());
        factory.hold();

        let task = {
            let factory = Arc::clone(&factory);
            tokio::spawn(async move {
                let master: FeedHandle = Arc::new(MockFeed::random());
                factory.derive(&master, &Keypair::generate()).await
            })
        };

        factory.derivations_reached(1).await;
        assert!(factory.all().is_empty());

        factory.release();
        task.await.unwrap().unwrap();
        assert_eq!(factory.all().len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_replication_waits_for_resume() {
        let factory = Arc::new(MockFeedFactory::new());
        factory.stall_replication();
        let feed = factory.open(&Keypair::generate().public_key()).await.unwrap();

        let (local, _remote) = feedmarket_net::MemoryTransport::pair();
        let task = tokio::spawn({
            let feed = Arc::clone(&feed);
            async move { feed.replicate(Arc::new(local), ReplicateOptions { live: true }).await }
        });
        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        factory.resume_replication();
        task.await.unwrap().unwrap();
        assert_eq!(factory.all()[0].replications().len(), 1);
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let remote = Ed25519PublicKey::from_bytes([1; 32]);
        let entitlement = ScriptedEntitlement::new([Step::deny("expired")], Step::grant());

        let err = entitlement.check(&remote).await.unwrap_err();
        assert_eq!(err.to_string(), "expired");
        assert_eq!(entitlement.check(&remote).await.unwrap(), None);
        assert_eq!(entitlement.check(&remote).await.unwrap(), None);
        assert_eq!(entitlement.calls(), 3);
        assert_eq!(entitlement.callers(), vec![remote; 3]);
    }

    #[tokio::test]
    async fn test_failing_store_only_fails_prefix() {
        let store = FailingStore::new(MemoryStore::new());
        store.fail_writes_under("capabilities/");

        assert!(store.put("capabilities/x", b"1").await.is_err());
        assert!(store.put_if_absent("identity/market", b"1").await.is_ok());

        store.heal();
        assert!(store.put("capabilities/x", b"1").await.is_ok());
        assert_eq!(store.get("capabilities/x").await.unwrap(), Some(b"1".to_vec()));
    }
}
