//! Negative cache (C6): remembers recent "definitely not found" lookups so a
//! stampede of requests for a missing id doesn't hammer the upstream
//! collaborator on every single one.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use whiplru_core::AssetId;

/// Sliding-TTL set of ids known to have missed recently.
///
/// A hit extends the entry's lifetime (sliding, not fixed, expiry) on the
/// theory that an id still being asked for is still worth remembering.
/// Configuring a zero or negative lifetime disables the cache entirely: every
/// lookup reports a miss and nothing is ever recorded.
pub struct NegativeCache {
    entries: DashMap<AssetId, Instant>,
    lifetime: Duration,
}

impl NegativeCache {
    /// Creates a cache with the given sliding lifetime. `Duration::ZERO`
    /// disables the cache.
    #[must_use]
    pub fn new(lifetime: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            lifetime,
        }
    }

    /// Whether the cache is configured to never remember anything.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.lifetime.is_zero()
    }

    /// Records `id` as a recent miss, starting (or restarting) its lifetime.
    pub fn record_miss(&self, id: AssetId) {
        if self.is_disabled() {
            return;
        }
        self.entries.insert(id, Instant::now());
    }

    /// Checks whether `id` is currently remembered as a miss. A hit refreshes
    /// the entry's expiry (sliding window). Expired entries are evicted
    /// lazily on lookup.
    pub fn check(&self, id: &AssetId) -> bool {
        if self.is_disabled() {
            return false;
        }
        let Some(mut entry) = self.entries.get_mut(id) else {
            return false;
        };
        if entry.elapsed() > self.lifetime {
            drop(entry);
            self.entries.remove(id);
            return false;
        }
        *entry = Instant::now();
        true
    }

    /// Forgets `id`, used once it is actually stored so a stale negative
    /// entry can't shadow a real hit.
    pub fn forget(&self, id: &AssetId) {
        self.entries.remove(id);
    }

    /// Drops every expired entry. Intended to run periodically from a
    /// background task rather than only lazily on lookup, so memory doesn't
    /// grow unbounded from ids nobody asks about again.
    pub fn sweep(&self) {
        if self.is_disabled() {
            return;
        }
        self.entries
            .retain(|_, inserted_at| inserted_at.elapsed() <= self.lifetime);
    }

    /// Number of entries currently remembered (including possibly-expired
    /// ones not yet swept).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_cache_never_remembers() {
        let cache = NegativeCache::new(Duration::ZERO);
        let id = AssetId::new_random();
        cache.record_miss(id);
        assert!(!cache.check(&id));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn recorded_miss_is_remembered_until_expiry() {
        let cache = NegativeCache::new(Duration::from_millis(20));
        let id = AssetId::new_random();
        cache.record_miss(id);
        assert!(cache.check(&id));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!cache.check(&id));
    }

    #[test]
    fn check_slides_the_expiry_window() {
        let cache = NegativeCache::new(Duration::from_millis(30));
        let id = AssetId::new_random();
        cache.record_miss(id);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.check(&id));
        std::thread::sleep(Duration::from_millis(20));
        // Had the window not slid, 40ms total would have expired a 30ms TTL.
        assert!(cache.check(&id));
    }

    #[test]
    fn forget_removes_entry_immediately() {
        let cache = NegativeCache::new(Duration::from_secs(60));
        let id = AssetId::new_random();
        cache.record_miss(id);
        cache.forget(&id);
        assert!(!cache.check(&id));
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let cache = NegativeCache::new(Duration::from_millis(20));
        let stale = AssetId::new_random();
        cache.record_miss(stale);
        std::thread::sleep(Duration::from_millis(30));
        let fresh = AssetId::new_random();
        cache.record_miss(fresh);

        cache.sweep();
        assert_eq!(cache.len(), 1);
    }
}
