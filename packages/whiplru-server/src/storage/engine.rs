//! The KV store adapter (C3): a transactional UUID -> bytes environment
//! backed by `redb`, one per partition directory.

use whiplru_core::AssetId;

/// Error surfaced by a [`KvEngine`].
///
/// `redb` has no native LMDB-style fixed `mapsize` that fails a write
/// closed; callers enforce the byte budget themselves (see
/// [`crate::storage::manager::StorageManager`]) and this adapter only
/// reports [`KvError::MapFull`] when asked to after that check fails.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The configured byte budget for this environment has been exhausted.
    #[error("map full")]
    MapFull,
    /// An insert-only `put` targeted a key that already exists.
    #[error("key exists")]
    KeyExists,
    /// Any other I/O or `redb` transaction failure.
    #[error("kv engine io error: {0}")]
    Io(String),
}

/// Transactional UUID -> bytes store over a single memory-mapped environment.
///
/// One `KvEngine` per partition directory. Write transactions are serialized
/// per environment by the implementation; read transactions are concurrent
/// with writes.
pub trait KvEngine: Send + Sync + 'static {
    /// Inserts `bytes` under `id`. Fails with [`KvError::KeyExists`] if
    /// `insert_only` is set and the key is already present, or
    /// [`KvError::MapFull`] if the environment has no room.
    fn put(&self, id: &AssetId, bytes: &[u8], insert_only: bool) -> Result<(), KvError>;

    /// Retrieves the bytes stored under `id`, if any.
    fn get(&self, id: &AssetId) -> Result<Option<Vec<u8>>, KvError>;

    /// Deletes `id`, returning whether a value was actually removed.
    fn delete(&self, id: &AssetId) -> Result<bool, KvError>;

    /// Checks whether `id` is present without reading its bytes.
    fn contains(&self, id: &AssetId) -> Result<bool, KvError>;

    /// Iterates every key currently stored in this environment.
    fn iter_keys(&self) -> Result<Vec<AssetId>, KvError>;

    /// An approximation of bytes currently occupied, used for budget checks.
    fn estimated_size_bytes(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_error_messages_match_adapter_contract() {
        assert_eq!(KvError::MapFull.to_string(), "map full");
        assert_eq!(KvError::KeyExists.to_string(), "key exists");
    }
}
