//! Crate-wide error vocabulary (§7 of the design: error kinds and propagation).

use whiplru_core::ProtocolError;

use crate::storage::KvError;

/// Error surfaced by the storage core or connection server.
///
/// Per-request errors never kill the connection unless they are
/// [`WhipLruError::Protocol`]. [`WhipLruError::Fatal`] is reserved for
/// startup failures that should abort the process.
#[derive(Debug, thiserror::Error)]
pub enum WhipLruError {
    /// A zero UUID, null asset, or other caller-supplied argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed framing, an unknown request type, or an over-sized payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The client's challenge-response hash did not match.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Purge of an unknown id, or a get miss with no upstream configured.
    #[error("asset not found")]
    AssetNotFound,

    /// Store of an id that is already present.
    #[error("asset already exists")]
    AssetExists,

    /// Eviction could not free enough space to satisfy a store.
    #[error("write cache full")]
    WriteCacheFull,

    /// A KV-engine error other than "full" or "exists".
    #[error("local storage error: {0}")]
    LocalStorageError(KvError),

    /// The upstream collaborator's fetch or put failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A startup failure: bind, mmap, or magic mismatch. The process exits.
    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl From<KvError> for WhipLruError {
    /// `MapFull` maps to its own `WriteCacheFull` variant (and its "full"
    /// wire diagnostic) rather than the generic `LocalStorageError` path, so
    /// a `KvEngine` that raises it is reported the same way eviction failure
    /// already is.
    fn from(err: KvError) -> Self {
        match err {
            KvError::MapFull => WhipLruError::WriteCacheFull,
            other => WhipLruError::LocalStorageError(other),
        }
    }
}

impl WhipLruError {
    /// The diagnostic text to place in an `RC_ERROR` response payload.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        match self {
            WhipLruError::AssetExists => "duplicate".to_string(),
            WhipLruError::WriteCacheFull => "full".to_string(),
            other => other.to_string(),
        }
    }
}
