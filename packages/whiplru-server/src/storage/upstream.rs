//! The upstream collaborator (C7): an abstract remote asset service this
//! server fetches misses from and durably forwards writes to.
//!
//! An async `get`/`put` pair behind `#[async_trait]`, with a no-op
//! implementation for configurations that run fully standalone.

use async_trait::async_trait;
use whiplru_core::AssetId;

/// Error returned by an [`UpstreamAssetService`] call.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The upstream does not have this asset either.
    #[error("not found upstream")]
    NotFound,
    /// `put` found the asset already present upstream. Treated as success by
    /// every caller that awaits `put`.
    #[error("already exists upstream")]
    AlreadyExists,
    /// Any other failure: network, timeout, remote 5xx, etc. Never inspected
    /// beyond its message -- callers surface it as `WhipLruError::Upstream`.
    #[error("upstream request failed: {0}")]
    Failed(String),
}

/// The remote asset service this cache fronts.
///
/// Implementations are expected to be cheaply `Clone`-able handles (a
/// connection pool, an HTTP client) wrapped in `Arc` by the caller, not the
/// service itself.
#[async_trait]
pub trait UpstreamAssetService: Send + Sync + 'static {
    /// Fetches the asset's bytes from upstream, if it has them.
    async fn get(&self, id: AssetId) -> Result<Vec<u8>, UpstreamError>;

    /// Forwards a write for `id` upstream. Called by the write-forward log's
    /// background worker, not directly by request handling.
    async fn put(&self, id: AssetId, bytes: Vec<u8>) -> Result<(), UpstreamError>;
}

/// An upstream that has nothing and accepts nothing; used when the server is
/// configured standalone with no remote collaborator.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullUpstream;

#[async_trait]
impl UpstreamAssetService for NullUpstream {
    async fn get(&self, _id: AssetId) -> Result<Vec<u8>, UpstreamError> {
        Err(UpstreamError::NotFound)
    }

    async fn put(&self, _id: AssetId, _bytes: Vec<u8>) -> Result<(), UpstreamError> {
        Ok(())
    }
}
