//! `redb`-backed implementation of [`KvEngine`].
//!
//! `redb` is an embedded, pure-Rust, single-file, transactional B+tree
//! store. It has no LMDB-style fixed `mapsize`; the byte budget named in
//! the design is enforced one layer up, in
//! [`crate::storage::manager::StorageManager`].

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableTable, TableDefinition};
use whiplru_core::AssetId;

use super::engine::{KvEngine, KvError};

const ASSETS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("assets");

/// A single partition's `redb` environment.
pub struct RedbEngine {
    db: Database,
    size_bytes: AtomicU64,
}

impl RedbEngine {
    /// Opens (creating if absent) the `redb` file at `path`.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        let db = Database::create(path).map_err(|e| KvError::Io(e.to_string()))?;

        // Make sure the table exists and compute a starting size estimate
        // from whatever is already on disk (crash-recovery / restart path).
        let mut size_bytes = 0u64;
        {
            let write_txn = db.begin_write().map_err(|e| KvError::Io(e.to_string()))?;
            {
                let table = write_txn
                    .open_table(ASSETS)
                    .map_err(|e| KvError::Io(e.to_string()))?;
                for entry in table.iter().map_err(|e| KvError::Io(e.to_string()))? {
                    let (_, value) = entry.map_err(|e| KvError::Io(e.to_string()))?;
                    size_bytes += value.value().len() as u64;
                }
            }
            write_txn.commit().map_err(|e| KvError::Io(e.to_string()))?;
        }

        Ok(Self {
            db,
            size_bytes: AtomicU64::new(size_bytes),
        })
    }
}

impl KvEngine for RedbEngine {
    fn put(&self, id: &AssetId, bytes: &[u8], insert_only: bool) -> Result<(), KvError> {
        let write_txn = self.db.begin_write().map_err(|e| KvError::Io(e.to_string()))?;
        let mut previous_len = None;
        {
            let mut table = write_txn
                .open_table(ASSETS)
                .map_err(|e| KvError::Io(e.to_string()))?;
            if insert_only {
                let exists = table
                    .get(id.as_bytes().as_slice())
                    .map_err(|e| KvError::Io(e.to_string()))?
                    .is_some();
                if exists {
                    return Err(KvError::KeyExists);
                }
            } else if let Some(existing) = table
                .get(id.as_bytes().as_slice())
                .map_err(|e| KvError::Io(e.to_string()))?
            {
                previous_len = Some(existing.value().len());
            }
            table
                .insert(id.as_bytes().as_slice(), bytes)
                .map_err(|e| KvError::Io(e.to_string()))?;
        }
        write_txn.commit().map_err(|e| KvError::Io(e.to_string()))?;

        match previous_len {
            Some(old) => {
                let delta = bytes.len() as i64 - old as i64;
                if delta >= 0 {
                    self.size_bytes.fetch_add(delta as u64, Ordering::Relaxed);
                } else {
                    self.size_bytes.fetch_sub((-delta) as u64, Ordering::Relaxed);
                }
            }
            None => {
                self.size_bytes
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn get(&self, id: &AssetId) -> Result<Option<Vec<u8>>, KvError> {
        let read_txn = self.db.begin_read().map_err(|e| KvError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(ASSETS)
            .map_err(|e| KvError::Io(e.to_string()))?;
        let value = table
            .get(id.as_bytes().as_slice())
            .map_err(|e| KvError::Io(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn delete(&self, id: &AssetId) -> Result<bool, KvError> {
        let write_txn = self.db.begin_write().map_err(|e| KvError::Io(e.to_string()))?;
        let removed_len = {
            let mut table = write_txn
                .open_table(ASSETS)
                .map_err(|e| KvError::Io(e.to_string()))?;
            table
                .remove(id.as_bytes().as_slice())
                .map_err(|e| KvError::Io(e.to_string()))?
                .map(|v| v.value().len())
        };
        write_txn.commit().map_err(|e| KvError::Io(e.to_string()))?;

        if let Some(len) = removed_len {
            self.size_bytes.fetch_sub(len as u64, Ordering::Relaxed);
        }
        Ok(removed_len.is_some())
    }

    fn contains(&self, id: &AssetId) -> Result<bool, KvError> {
        let read_txn = self.db.begin_read().map_err(|e| KvError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(ASSETS)
            .map_err(|e| KvError::Io(e.to_string()))?;
        Ok(table
            .get(id.as_bytes().as_slice())
            .map_err(|e| KvError::Io(e.to_string()))?
            .is_some())
    }

    fn iter_keys(&self) -> Result<Vec<AssetId>, KvError> {
        let read_txn = self.db.begin_read().map_err(|e| KvError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(ASSETS)
            .map_err(|e| KvError::Io(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| KvError::Io(e.to_string()))? {
            let (key, _) = entry.map_err(|e| KvError::Io(e.to_string()))?;
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(key.value());
            out.push(AssetId(bytes));
        }
        Ok(out)
    }

    fn estimated_size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::open(&dir.path().join("data.redb")).unwrap();
        let id = AssetId::new_random();
        engine.put(&id, b"hello", false).unwrap();
        assert_eq!(engine.get(&id).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(engine.estimated_size_bytes(), 5);
    }

    #[test]
    fn insert_only_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::open(&dir.path().join("data.redb")).unwrap();
        let id = AssetId::new_random();
        engine.put(&id, b"a", true).unwrap();
        let err = engine.put(&id, b"b", true).unwrap_err();
        assert!(matches!(err, KvError::KeyExists));
    }

    #[test]
    fn delete_removes_and_reports() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::open(&dir.path().join("data.redb")).unwrap();
        let id = AssetId::new_random();
        engine.put(&id, b"a", false).unwrap();
        assert!(engine.delete(&id).unwrap());
        assert!(!engine.delete(&id).unwrap());
        assert_eq!(engine.get(&id).unwrap(), None);
    }

    #[test]
    fn iter_keys_lists_all_entries() {
        let dir = tempdir().unwrap();
        let engine = RedbEngine::open(&dir.path().join("data.redb")).unwrap();
        let a = AssetId::new_random();
        let b = AssetId::new_random();
        engine.put(&a, b"x", false).unwrap();
        engine.put(&b, b"y", false).unwrap();
        let keys = engine.iter_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&a));
        assert!(keys.contains(&b));
    }
}
