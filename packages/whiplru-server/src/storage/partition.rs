//! Time-sliced partitioning (C2): many small `redb` environments rather than
//! one big one, so whole epochs can be dropped in O(1) instead of evicting
//! key-by-key forever.
//!
//! Partitions are directories under the storage root named by the Unix
//! timestamp (seconds) at which they were created. The most recently created
//! partition is always the "active" one new writes land in; [`rotate`] seals
//! it and opens a fresh one. Reads that land on an older partition trigger
//! migration-on-access: the bytes are copied into the active partition so
//! hot assets survive their origin epoch being dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{info, warn};
use whiplru_core::AssetId;

use super::engine::{KvEngine, KvError};
use super::index::{IndexEntry, PartitionId, RecencyIndex};
use super::redb_engine::RedbEngine;

/// One time-sliced shard: a directory holding a single `redb` environment.
pub struct Partition {
    pub id: PartitionId,
    pub dir: PathBuf,
    pub engine: Arc<dyn KvEngine>,
}

impl Partition {
    fn open(root: &Path, id: PartitionId) -> Result<Self, KvError> {
        let dir = root.join(id.0.to_string());
        std::fs::create_dir_all(&dir).map_err(|e| KvError::Io(e.to_string()))?;
        let engine = Arc::new(RedbEngine::open(&dir.join("data.redb"))?);
        Ok(Self { id, dir, engine })
    }
}

/// Owns every partition and the recency index describing what lives where.
pub struct PartitionManager {
    root: PathBuf,
    max_total_bytes: u64,
    rotation_interval: Duration,
    index: Arc<RecencyIndex>,
    partitions: ArcSwap<Vec<Arc<Partition>>>,
    rotation_lock: Mutex<()>,
}

impl PartitionManager {
    /// Scans `root` for existing partition directories, reopens each, and
    /// reconstructs the recency index from what it finds. Creates the first
    /// partition if `root` is empty.
    pub fn open(
        root: PathBuf,
        max_total_bytes: u64,
        rotation_interval: Duration,
        index: Arc<RecencyIndex>,
    ) -> Result<Self, KvError> {
        std::fs::create_dir_all(&root).map_err(|e| KvError::Io(e.to_string()))?;

        let mut ids: Vec<u64> = std::fs::read_dir(&root)
            .map_err(|e| KvError::Io(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()))
            .collect();
        ids.sort_unstable();

        let mut partitions = Vec::with_capacity(ids.len().max(1));
        for raw_id in ids {
            let id = PartitionId(raw_id);
            let partition = Partition::open(&root, id)?;
            for asset_id in partition.engine.iter_keys()? {
                if let Some(bytes) = partition.engine.get(&asset_id)? {
                    index.insert_known(asset_id, bytes.len() as u64, id);
                }
            }
            partitions.push(Arc::new(partition));
        }

        if partitions.is_empty() {
            let id = PartitionId(current_unix_seconds());
            partitions.push(Arc::new(Partition::open(&root, id)?));
        }

        info!(partitions = partitions.len(), "recovered partition set");

        Ok(Self {
            root,
            max_total_bytes,
            rotation_interval,
            index,
            partitions: ArcSwap::from_pointee(partitions),
            rotation_lock: Mutex::new(()),
        })
    }

    /// The partition new writes should land in.
    #[must_use]
    pub fn active(&self) -> Arc<Partition> {
        let partitions = self.partitions.load();
        partitions
            .last()
            .cloned()
            .expect("at least one partition always exists")
    }

    fn find(&self, id: PartitionId) -> Option<Arc<Partition>> {
        self.partitions
            .load()
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Age of the active partition, used by the rotation background task to
    /// decide whether it is time to call [`rotate`].
    #[must_use]
    pub fn active_age(&self) -> Duration {
        let active = self.active();
        let now = current_unix_seconds();
        Duration::from_secs(now.saturating_sub(active.id.0))
    }

    /// The configured rotation period.
    #[must_use]
    pub fn rotation_interval(&self) -> Duration {
        self.rotation_interval
    }

    /// Seals the active partition and opens a fresh one. If the new total
    /// would exceed [`Self::max_total_bytes`]'s configured budget, the
    /// oldest partitions are dropped wholesale until it fits.
    pub fn rotate(&self) -> Result<(), KvError> {
        let _guard = self.rotation_lock.lock();

        let new_id = PartitionId(current_unix_seconds());
        if self.find(new_id).is_some() {
            // Rotation requested twice within the same second; nothing to do.
            return Ok(());
        }
        let new_partition = Arc::new(Partition::open(&self.root, new_id)?);

        let mut next: Vec<Arc<Partition>> = (**self.partitions.load()).clone();
        next.push(new_partition);
        self.partitions.store(Arc::new(next));

        self.enforce_budget()?;
        Ok(())
    }

    /// Total estimated bytes across every partition.
    #[must_use]
    pub fn total_size_bytes(&self) -> u64 {
        self.partitions
            .load()
            .iter()
            .map(|p| p.engine.estimated_size_bytes())
            .sum()
    }

    /// Drops whole partitions, oldest first, until the total is within
    /// budget. Never drops the active (most recent) partition.
    fn enforce_budget(&self) -> Result<(), KvError> {
        loop {
            if self.total_size_bytes() <= self.max_total_bytes {
                return Ok(());
            }
            let partitions = self.partitions.load();
            if partitions.len() <= 1 {
                return Ok(());
            }
            let oldest = partitions[0].clone();
            drop(partitions);

            warn!(partition = oldest.id.0, "dropping partition over budget");
            let removed_ids = self.index.remove_partition(oldest.id);
            let mut next: Vec<Arc<Partition>> = (**self.partitions.load())
                .iter()
                .filter(|p| p.id != oldest.id)
                .cloned()
                .collect();
            if next.is_empty() {
                next.push(oldest.clone());
                self.partitions.store(Arc::new(next));
                return Ok(());
            }
            self.partitions.store(Arc::new(next));
            std::fs::remove_dir_all(&oldest.dir).map_err(|e| KvError::Io(e.to_string()))?;
            drop(removed_ids);
        }
    }

    /// Writes `bytes` under `id` into the active partition and records it in
    /// the index. `insert_only` forwards to the underlying engine.
    pub fn put_active(&self, id: AssetId, bytes: &[u8], insert_only: bool) -> Result<PartitionId, KvError> {
        let active = self.active();
        active.engine.put(&id, bytes, insert_only)?;
        Ok(active.id)
    }

    /// Reads `id`. If found in a partition other than the active one, the
    /// bytes are migrated into the active partition first (copy-on-access):
    /// the index is flipped to point at the new partition *before* the
    /// source copy is deleted, so a concurrent migration or crash never
    /// leaves the index referencing a partition the bytes were just removed
    /// from.
    pub fn get_with_migration(&self, id: &AssetId) -> Result<Option<Vec<u8>>, KvError> {
        let Some(entry_partition) = self.index.partition_of(id) else {
            return Ok(None);
        };
        let active = self.active();

        if entry_partition == active.id {
            return active.engine.get(id);
        }

        let Some(source) = self.find(entry_partition) else {
            // Partition vanished (rotated out from under us); treat as miss.
            self.index.try_remove(id);
            return Ok(None);
        };
        let Some(bytes) = source.engine.get(id)? else {
            return Ok(None);
        };

        active.engine.put(id, &bytes, false)?;
        self.index.reassign_partition(id, active.id);
        source.engine.delete(id)?;

        Ok(Some(bytes))
    }

    /// Deletes `id` from whichever partition the index says it lives in.
    pub fn delete(&self, id: &AssetId) -> Result<bool, KvError> {
        let Some(entry) = self.remove_index_entry(id) else {
            return Ok(false);
        };
        if let Some(partition) = self.find(entry.partition) {
            partition.engine.delete(id)
        } else {
            Ok(false)
        }
    }

    fn remove_index_entry(&self, id: &AssetId) -> Option<IndexEntry> {
        self.index.try_remove(id)
    }

    /// Deletes every id from its recorded partition. Used by the eviction
    /// path: the caller must pass exactly the ids [`RecencyIndex::evict_until_freed`]
    /// returned, each paired with the partition it actually lived in.
    pub fn delete_evicted(&self, ids: &[(AssetId, PartitionId)]) -> Result<(), KvError> {
        for (id, partition_id) in ids {
            if let Some(partition) = self.find(*partition_id) {
                partition.engine.delete(id)?;
            }
        }
        Ok(())
    }

    /// Wipes every partition's contents and the index, leaving a single
    /// fresh empty partition behind.
    pub fn purge_all(&self) -> Result<(), KvError> {
        let _guard = self.rotation_lock.lock();
        let old_partitions = (**self.partitions.load()).clone();
        self.index.clear();

        let new_id = PartitionId(current_unix_seconds());
        let fresh = Arc::new(Partition::open(&self.root, new_id)?);
        self.partitions.store(Arc::new(vec![fresh]));

        for partition in old_partitions {
            if partition.id != new_id {
                let _ = std::fs::remove_dir_all(&partition.dir);
            }
        }
        Ok(())
    }
}

fn current_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get_round_trip_in_active_partition() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(RecencyIndex::new());
        let mgr = PartitionManager::open(
            dir.path().to_path_buf(),
            u64::MAX,
            Duration::from_secs(3600),
            index.clone(),
        )
        .unwrap();
        let id = AssetId::new_random();
        let partition_id = mgr.put_active(id, b"hello", false).unwrap();
        index.try_add(id, 5, partition_id);

        assert_eq!(mgr.get_with_migration(&id).unwrap(), Some(b"hello".to_vec()));
        drop(mgr);
    }

    #[test]
    fn rotate_creates_new_active_without_losing_old_data() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(RecencyIndex::new());
        let mgr = PartitionManager::open(
            dir.path().to_path_buf(),
            u64::MAX,
            Duration::from_secs(3600),
            index.clone(),
        )
        .unwrap();
        let id = AssetId::new_random();
        let partition_id = mgr.put_active(id, b"data", false).unwrap();
        index.try_add(id, 4, partition_id);

        std::thread::sleep(Duration::from_millis(1100));
        mgr.rotate().unwrap();
        assert_ne!(mgr.active().id, partition_id);

        let fetched = mgr.get_with_migration(&id).unwrap();
        assert_eq!(fetched, Some(b"data".to_vec()));
        // Migration-on-access should have moved it to the new active partition.
        assert_eq!(index.partition_of(&id), Some(mgr.active().id));
    }

    #[test]
    fn purge_all_empties_every_partition() {
        let dir = tempfile::tempdir().unwrap();
        let index = Arc::new(RecencyIndex::new());
        let mgr = PartitionManager::open(
            dir.path().to_path_buf(),
            u64::MAX,
            Duration::from_secs(3600),
            index.clone(),
        )
        .unwrap();
        let id = AssetId::new_random();
        let partition_id = mgr.put_active(id, b"x", false).unwrap();
        index.try_add(id, 1, partition_id);

        mgr.purge_all().unwrap();
        assert_eq!(mgr.get_with_migration(&id).unwrap(), None);
        assert_eq!(index.len(), 0);
    }
}
