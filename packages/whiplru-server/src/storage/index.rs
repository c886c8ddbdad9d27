//! The recency index (C1): in-memory UUID -> `{size, last-access, partition}`.
//!
//! Backed by `dashmap::DashMap`, giving the fine-grained concurrent access
//! the connection server needs when many request-handling tasks touch the
//! index simultaneously (`network/connection.rs`'s `ConnectionRegistry`
//! makes the identical choice for its connection table).

use std::time::Instant;

use dashmap::DashMap;
use whiplru_core::AssetId;

/// Identifies a partition by the instant (seconds since `UNIX_EPOCH`) it was
/// created. Entries store this id rather than a back-pointer to the
/// partition itself, avoiding a cyclic reference between index and manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u64);

/// A single recency-index entry.
///
/// `size == 0` means "reserved: write in progress, not yet flushed to disk."
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Size in bytes of the stored asset, or 0 if the write is still in flight.
    pub size: u64,
    /// The partition currently holding this asset's bytes.
    pub partition: PartitionId,
    /// Last time this entry was read or written.
    pub last_access: Instant,
}

/// Concurrent UUID -> entry map with LRU-ordered eviction selection.
pub struct RecencyIndex {
    entries: DashMap<AssetId, IndexEntry>,
}

impl RecencyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Reserves an entry for `id` in `partition` with the given `size`.
    ///
    /// Returns `false` without modifying the index if `id` is already known
    /// (the caller should treat this as a duplicate).
    pub fn try_add(&self, id: AssetId, size: u64, partition: PartitionId) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(IndexEntry {
                    size,
                    partition,
                    last_access: Instant::now(),
                });
                true
            }
        }
    }

    /// Inserts or overwrites an entry unconditionally, used when the
    /// partition manager reconstructs the index from an on-disk scan at
    /// startup.
    pub fn insert_known(&self, id: AssetId, size: u64, partition: PartitionId) {
        self.entries.insert(
            id,
            IndexEntry {
                size,
                partition,
                last_access: Instant::now(),
            },
        );
    }

    /// Whether `id` is known to the index. Refreshes `last_access`.
    #[must_use]
    pub fn contains(&self, id: &AssetId) -> bool {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.last_access = Instant::now();
            true
        } else {
            false
        }
    }

    /// Returns the tracked size for `id`, refreshing `last_access`.
    pub fn size_of(&self, id: &AssetId) -> Option<u64> {
        self.entries.get_mut(id).map(|mut entry| {
            entry.last_access = Instant::now();
            entry.size
        })
    }

    /// Returns the partition currently holding `id`, refreshing `last_access`.
    pub fn partition_of(&self, id: &AssetId) -> Option<PartitionId> {
        self.entries.get_mut(id).map(|mut entry| {
            entry.last_access = Instant::now();
            entry.partition
        })
    }

    /// Patches the size of an existing entry (used once an in-flight write
    /// completes). Returns whether the entry existed.
    pub fn set_size(&self, id: &AssetId, size: u64) -> bool {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.size = size;
            true
        } else {
            false
        }
    }

    /// Re-homes an entry to a different partition (used by partition
    /// migration-on-access). Returns whether the entry existed.
    pub fn reassign_partition(&self, id: &AssetId, partition: PartitionId) -> bool {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.partition = partition;
            entry.last_access = Instant::now();
            true
        } else {
            false
        }
    }

    /// Removes `id`, returning its entry if it was present.
    pub fn try_remove(&self, id: &AssetId) -> Option<IndexEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Every id currently known to the index, in no particular order. Used
    /// by filtered purge, which must inspect each asset's payload to decide
    /// whether it matches.
    #[must_use]
    pub fn all_ids(&self) -> Vec<AssetId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Returns every known id whose lowercase 32-hex compact form starts
    /// with `prefix`. Refreshes `last_access` on each match.
    #[must_use]
    pub fn items_with_prefix(&self, prefix: &str) -> Vec<AssetId> {
        let prefix = prefix.to_ascii_lowercase();
        let mut out = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.key().to_compact_hex().starts_with(&prefix) {
                entry.value_mut().last_access = Instant::now();
                out.push(*entry.key());
            }
        }
        out
    }

    /// Removes entries in ascending `last_access` order until at least
    /// `min_bytes` have been freed. Entries with `size == 0` (write still in
    /// flight) are skipped and never evicted.
    ///
    /// Returns the list of `(id, partition)` actually removed and the total
    /// bytes freed. Callers must delete exactly these ids from their
    /// partitions -- not, as a known historical bug in the single-partition
    /// retry path did, the id of whatever asset triggered the eviction.
    pub fn evict_until_freed(&self, min_bytes: u64) -> (Vec<(AssetId, PartitionId)>, u64) {
        let mut candidates: Vec<(AssetId, PartitionId, Instant, u64)> = self
            .entries
            .iter()
            .filter(|e| e.value().size > 0)
            .map(|e| (*e.key(), e.value().partition, e.value().last_access, e.value().size))
            .collect();
        candidates.sort_by_key(|(_, _, last_access, _)| *last_access);

        let mut removed = Vec::new();
        let mut freed = 0u64;
        for (id, partition, _, size) in candidates {
            if freed >= min_bytes {
                break;
            }
            if self.entries.remove(&id).is_some() {
                freed += size;
                removed.push((id, partition));
            }
        }
        (removed, freed)
    }

    /// Removes every entry belonging to `partition` (whole-partition
    /// eviction). Returns the removed ids.
    pub fn remove_partition(&self, partition: PartitionId) -> Vec<AssetId> {
        let ids: Vec<AssetId> = self
            .entries
            .iter()
            .filter(|e| e.value().partition == partition)
            .map(|e| *e.key())
            .collect();
        for id in &ids {
            self.entries.remove(id);
        }
        ids
    }

    /// Removes every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Total number of known entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecencyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_add_rejects_duplicate() {
        let index = RecencyIndex::new();
        let id = AssetId::new_random();
        assert!(index.try_add(id, 10, PartitionId(1)));
        assert!(!index.try_add(id, 20, PartitionId(1)));
    }

    #[test]
    fn contains_and_size_of_refresh_last_access() {
        let index = RecencyIndex::new();
        let id = AssetId::new_random();
        index.try_add(id, 5, PartitionId(1));
        assert!(index.contains(&id));
        assert_eq!(index.size_of(&id), Some(5));
        assert!(!index.contains(&AssetId::new_random()));
    }

    #[test]
    fn set_size_patches_in_flight_entry() {
        let index = RecencyIndex::new();
        let id = AssetId::new_random();
        index.try_add(id, 0, PartitionId(1));
        assert!(index.set_size(&id, 42));
        assert_eq!(index.size_of(&id), Some(42));
    }

    #[test]
    fn evict_until_freed_skips_in_flight_entries() {
        let index = RecencyIndex::new();
        let in_flight = AssetId::new_random();
        let ready = AssetId::new_random();
        index.try_add(in_flight, 0, PartitionId(1));
        index.try_add(ready, 100, PartitionId(1));

        let (removed, freed) = index.evict_until_freed(50);
        assert_eq!(removed, vec![(ready, PartitionId(1))]);
        assert_eq!(freed, 100);
        assert!(index.contains(&in_flight));
    }

    #[test]
    fn evict_until_freed_orders_by_ascending_last_access() {
        let index = RecencyIndex::new();
        let old = AssetId::new_random();
        index.try_add(old, 10, PartitionId(1));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = AssetId::new_random();
        index.try_add(newer, 10, PartitionId(1));

        let (removed, freed) = index.evict_until_freed(10);
        assert_eq!(removed, vec![(old, PartitionId(1))]);
        assert_eq!(freed, 10);
        assert!(index.contains(&newer));
    }

    #[test]
    fn items_with_prefix_matches_scenario_s6() {
        let index = RecencyIndex::new();
        let fcf1 = AssetId::from_compact_hex(&format!("fcf{}", "0".repeat(29))).unwrap();
        let fcf2 = AssetId::from_compact_hex(&format!("fcf{}", "1".repeat(29))).unwrap();
        let fcf3 = AssetId::from_compact_hex(&format!("fcf{}", "2".repeat(29))).unwrap();
        let abc = AssetId::from_compact_hex(&format!("abc{}", "0".repeat(29))).unwrap();
        for id in [fcf1, fcf2, fcf3, abc] {
            index.try_add(id, 1, PartitionId(1));
        }
        let mut matched = index.items_with_prefix("fcf");
        matched.sort();
        let mut expected = vec![fcf1, fcf2, fcf3];
        expected.sort();
        assert_eq!(matched, expected);
    }

    #[test]
    fn remove_partition_removes_only_matching_entries() {
        let index = RecencyIndex::new();
        let a = AssetId::new_random();
        let b = AssetId::new_random();
        index.try_add(a, 1, PartitionId(1));
        index.try_add(b, 1, PartitionId(2));

        let removed = index.remove_partition(PartitionId(1));
        assert_eq!(removed, vec![a]);
        assert!(!index.contains(&a));
        assert!(index.contains(&b));
    }
}
