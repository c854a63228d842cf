//! The seller-supplied entitlement check.

use std::future::Future;

use async_trait::async_trait;

use feedmarket_core::{Ed25519PublicKey, GrantInfo};

/// Decides whether an authenticated peer currently has paid access.
///
/// Invoked once right after the handshake and then repeatedly at the
/// configured interval for the life of the connection. Implementations need
/// no timeout of their own: a hung check only stalls its own connection.
#[async_trait]
pub trait Entitlement: Send + Sync {
    /// `Ok` grants access, optionally with info for the buyer.
    /// `Err` denies it; the error's message becomes the denial reason.
    async fn check(&self, remote: &Ed25519PublicKey) -> anyhow::Result<Option<GrantInfo>>;
}

/// Grants everyone, with no info.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Entitlement for AllowAll {
    async fn check(&self, _remote: &Ed25519PublicKey) -> anyhow::Result<Option<GrantInfo>> {
        Ok(None)
    }
}

/// Entitlement backed by an async closure. See [`entitlement_fn`].
pub struct FnEntitlement<F> {
    f: F,
}

/// Wrap an async closure as an [`Entitlement`].
///
/// ```rust
/// use feedmarket_access::{entitlement_fn, AccessError};
///
/// let paid = entitlement_fn(|_remote| async move {
///     Err::<Option<feedmarket_core::GrantInfo>, _>(anyhow::Error::new(AccessError::Denied(
///         "unpaid".into(),
///     )))
/// });
/// ```
pub fn entitlement_fn<F, Fut>(f: F) -> FnEntitlement<F>
where
    F: Fn(Ed25519PublicKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<GrantInfo>>> + Send,
{
    FnEntitlement { f }
}

#[async_trait]
impl<F, Fut> Entitlement for FnEntitlement<F>
where
    F: Fn(Ed25519PublicKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<GrantInfo>>> + Send,
{
    async fn check(&self, remote: &Ed25519PublicKey) -> anyhow::Result<Option<GrantInfo>> {
        (self.f)(*remote).await
    }
}
