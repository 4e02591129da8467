//! Content-addressed build cache
//!
//! Maps a [`FeatureHash`] to the value built for it. Every feature goes
//! through [`BuildCache::get_or_build`], which runs the builder at most once
//! per hash no matter how many sessions ask for it concurrently.
//!
//! Entries are stored type-erased and recovered by a checked downcast. A
//! lookup whose tag or type disagrees with the stored entry fails with
//! [`CacheError::TypeMismatch`] instead of returning the wrong geometry.

mod entry;
mod summary;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::hash::FeatureHash;

use entry::CacheEntry;
use summary::AtomicStats;
pub use summary::{CacheStats, CacheSummary, EntrySummary};

/// Where a looked-up value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Origin {
    /// The builder ran for this call
    Built,
    /// An existing entry was reused
    Cached,
}

/// Result of a cache lookup
#[derive(Debug)]
pub struct CacheLookup<T> {
    pub value: Arc<T>,
    pub origin: Origin,
}

impl<T> CacheLookup<T> {
    pub fn was_cached(&self) -> bool {
        self.origin == Origin::Cached
    }
}

#[derive(Default)]
struct Shard {
    ready: HashMap<FeatureHash, Arc<CacheEntry>>,
    // One gate per hash currently being built. Callers for the same hash
    // queue on the gate and re-check `ready` once they hold it.
    building: HashMap<FeatureHash, Arc<Mutex<()>>>,
}

/// Thread-safe feature cache shared by all rebuild sessions
pub struct BuildCache {
    shards: Box<[Mutex<Shard>]>,
    capacity: Option<usize>,
    clock: AtomicU64,
    stats: AtomicStats,
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl BuildCache {
    pub fn new(config: CacheConfig) -> Self {
        let shards = (0..config.shard_count.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self {
            shards,
            capacity: config.capacity,
            clock: AtomicU64::new(0),
            stats: AtomicStats::default(),
        }
    }

    fn shard(&self, hash: &FeatureHash) -> &Mutex<Shard> {
        &self.shards[hash.shard(self.shards.len())]
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Logical time of the most recent cache access
    pub fn current_tick(&self) -> u64 {
        self.clock.load(Ordering::Relaxed)
    }

    fn lookup(&self, hash: &FeatureHash) -> Option<Arc<CacheEntry>> {
        self.shard(hash).lock().ready.get(hash).cloned()
    }

    fn hit<T: Any + Send + Sync>(
        &self,
        entry: &CacheEntry,
        hash: FeatureHash,
        tag: &'static str,
    ) -> CacheResult<CacheLookup<T>> {
        let value = entry.typed::<T>(tag)?;
        entry.touch(self.tick());
        AtomicStats::bump(&self.stats.hits);
        tracing::trace!("Cache hit {} ({})", hash, tag);
        Ok(CacheLookup {
            value,
            origin: Origin::Cached,
        })
    }

    /// Return the value for `hash`, running `builder` if no entry exists
    ///
    /// Concurrent callers with the same hash wait for the first builder and
    /// then share its result. A failed build leaves nothing behind, so the
    /// next caller tries again. The builder must not request its own hash.
    pub fn get_or_build<T, E, F>(
        &self,
        hash: FeatureHash,
        tag: &'static str,
        builder: F,
    ) -> Result<CacheLookup<T>, E>
    where
        T: Any + Send + Sync,
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        let gate = {
            let mut shard = self.shard(&hash).lock();
            if let Some(entry) = shard.ready.get(&hash).cloned() {
                drop(shard);
                return self.hit(&entry, hash, tag).map_err(E::from);
            }
            Arc::clone(shard.building.entry(hash).or_default())
        };

        let _guard = gate.lock();

        // Someone else may have finished while we waited on the gate
        if let Some(entry) = self.lookup(&hash) {
            return self.hit(&entry, hash, tag).map_err(E::from);
        }

        AtomicStats::bump(&self.stats.misses);
        tracing::debug!("Building {} ({})", hash, tag);

        match builder() {
            Ok(value) => {
                let value = Arc::new(value);
                let entry = Arc::new(CacheEntry::new(hash, tag, Arc::clone(&value), self.tick()));
                {
                    let mut shard = self.shard(&hash).lock();
                    shard.ready.insert(hash, entry);
                    Self::release_gate(&mut shard, &hash, &gate, true);
                }
                AtomicStats::bump(&self.stats.builds);
                self.enforce_capacity();
                Ok(CacheLookup {
                    value,
                    origin: Origin::Built,
                })
            }
            Err(err) => {
                AtomicStats::bump(&self.stats.failed_builds);
                tracing::debug!("Build of {} ({}) failed, nothing cached", hash, tag);
                let mut shard = self.shard(&hash).lock();
                Self::release_gate(&mut shard, &hash, &gate, false);
                Err(err)
            }
        }
    }

    fn release_gate(shard: &mut Shard, hash: &FeatureHash, gate: &Arc<Mutex<()>>, built: bool) {
        let Some(current) = shard.building.get(hash) else {
            return;
        };
        if !Arc::ptr_eq(current, gate) {
            return;
        }
        // After a failure, waiters keep the gate so the next one retries.
        // The map and this caller account for two references.
        if built || Arc::strong_count(gate) <= 2 {
            shard.building.remove(hash);
        }
    }

    /// Look up an existing entry and count the use
    ///
    /// Returns `Ok(None)` when nothing is cached for `hash`.
    pub fn mark_as_used<T: Any + Send + Sync>(
        &self,
        hash: FeatureHash,
        tag: &'static str,
    ) -> CacheResult<Option<Arc<T>>> {
        match self.lookup(&hash) {
            Some(entry) => self.hit::<T>(&entry, hash, tag).map(|found| Some(found.value)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, hash: &FeatureHash) -> bool {
        self.shard(hash).lock().ready.contains_key(hash)
    }

    /// Usage count of an entry
    pub fn uses(&self, hash: &FeatureHash) -> Option<u64> {
        self.lookup(hash).map(|entry| entry.uses())
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().ready.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    ///
    /// Values already handed out stay valid. Builds in flight still insert
    /// their result when they finish.
    pub fn clear(&self) {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            removed += shard.ready.len();
            shard.ready.clear();
        }
        tracing::info!("Feature cache cleared ({} entries)", removed);
    }

    /// Drop entries not used since `tick`, keeping any still held by a caller
    pub fn retain_used_since(&self, tick: u64) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            let before = shard.ready.len();
            shard
                .ready
                .retain(|_, entry| entry.last_used() >= tick || entry.is_referenced());
            removed += before - shard.ready.len();
        }
        if removed > 0 {
            tracing::debug!("Pruned {} unused cache entries", removed);
        }
        removed
    }

    fn enforce_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while self.len() > capacity {
            if !self.evict_one() {
                tracing::debug!(
                    "Cache over capacity ({} > {}) but every entry is in use",
                    self.len(),
                    capacity
                );
                break;
            }
        }
    }

    // Shards are scanned one at a time; no two shard locks are ever held
    // together.
    fn evict_one(&self) -> bool {
        let mut victim: Option<(u64, FeatureHash, Arc<CacheEntry>)> = None;
        for shard in self.shards.iter() {
            let shard = shard.lock();
            for (hash, entry) in &shard.ready {
                if entry.is_referenced() {
                    continue;
                }
                let last_used = entry.last_used();
                if victim.as_ref().is_none_or(|(best, _, _)| last_used < *best) {
                    victim = Some((last_used, *hash, Arc::clone(entry)));
                }
            }
        }

        let Some((_, hash, entry)) = victim else {
            return false;
        };

        let mut shard = self.shard(&hash).lock();
        let still_there = shard
            .ready
            .get(&hash)
            .is_some_and(|current| Arc::ptr_eq(current, &entry));
        if still_there {
            shard.ready.remove(&hash);
            AtomicStats::bump(&self.stats.evictions);
            tracing::debug!("Evicted {} ({})", hash, entry.tag());
        }
        true
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Snapshot of all entries, least recently used first
    pub fn summary(&self) -> CacheSummary {
        let mut entries: Vec<EntrySummary> = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            entries.extend(shard.ready.iter().map(|(hash, entry)| EntrySummary {
                hash: *hash,
                tag: entry.tag(),
                type_name: entry.type_name(),
                uses: entry.uses(),
                last_used: entry.last_used(),
                referenced: entry.is_referenced(),
            }));
        }
        entries.sort_by(|a, b| a.last_used.cmp(&b.last_used).then(a.hash.cmp(&b.hash)));
        CacheSummary {
            entries,
            stats: self.stats(),
            capacity: self.capacity,
        }
    }

    /// Write the summary to the log
    pub fn log_summary(&self) {
        let summary = self.summary();
        let stats = summary.stats;
        tracing::info!(
            "Feature cache: {} entries, {} hits, {} misses, {} evictions",
            summary.len(),
            stats.hits,
            stats.misses,
            stats.evictions
        );
        for entry in &summary.entries {
            tracing::debug!(
                "  {} {} uses={} last_used={}",
                entry.hash,
                entry.tag,
                entry.uses,
                entry.last_used
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, PartialEq)]
    struct Fail;

    impl From<CacheError> for Fail {
        fn from(_: CacheError) -> Self {
            Fail
        }
    }

    fn h(name: &str) -> FeatureHash {
        FeatureHash::from_bytes(name.as_bytes())
    }

    fn build(cache: &BuildCache, name: &str, value: u32) -> CacheLookup<u32> {
        cache
            .get_or_build::<u32, CacheError, _>(h(name), "Num", || Ok(value))
            .unwrap()
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = BuildCache::default();
        let first = build(&cache, "a", 1);
        assert_eq!(first.origin, Origin::Built);

        let second = build(&cache, "a", 99);
        assert!(second.was_cached());
        assert_eq!(*second.value, 1);
        assert!(Arc::ptr_eq(&first.value, &second.value));

        assert_eq!(cache.uses(&h("a")), Some(2));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.builds), (1, 1, 1));
    }

    #[test]
    fn test_type_mismatch() {
        let cache = BuildCache::default();
        build(&cache, "a", 1);

        let wrong_tag = cache.get_or_build::<u32, CacheError, _>(h("a"), "Other", || Ok(2));
        assert!(matches!(wrong_tag, Err(CacheError::TypeMismatch { .. })));

        let wrong_type = cache.mark_as_used::<String>(h("a"), "Num");
        assert!(matches!(wrong_type, Err(CacheError::TypeMismatch { .. })));
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = BuildCache::default();
        let result = cache.get_or_build::<u32, Fail, _>(h("a"), "Num", || Err(Fail));
        assert_eq!(result.unwrap_err(), Fail);
        assert!(!cache.contains(&h("a")));
        assert_eq!(cache.stats().failed_builds, 1);

        let retry = build(&cache, "a", 3);
        assert_eq!(retry.origin, Origin::Built);
        assert!(cache.shards.iter().all(|s| s.lock().building.is_empty()));
    }

    #[test]
    fn test_mark_as_used() {
        let cache = BuildCache::default();
        assert_eq!(cache.mark_as_used::<u32>(h("a"), "Num"), Ok(None));

        build(&cache, "a", 4);
        let found = cache.mark_as_used::<u32>(h("a"), "Num").unwrap();
        assert_eq!(found.as_deref(), Some(&4));
        assert_eq!(cache.uses(&h("a")), Some(2));
    }

    #[test]
    fn test_concurrent_builds_run_once() {
        let cache = Arc::new(BuildCache::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_build::<u32, CacheError, _>(h("shared"), "Num", || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(7)
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|r| r.origin == Origin::Built).count(), 1);
        assert!(results.iter().all(|r| *r.value == 7));
        assert_eq!(cache.uses(&h("shared")), Some(8));
    }

    #[test]
    fn test_waiter_retries_after_failure() {
        let cache = Arc::new(BuildCache::default());
        let attempts = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let attempts = Arc::clone(&attempts);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_build::<u32, Fail, _>(h("flaky"), "Num", || {
                        std::thread::sleep(std::time::Duration::from_millis(10));
                        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(Fail)
                        } else {
                            Ok(1)
                        }
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(cache.contains(&h("flaky")));
    }

    #[test]
    fn test_clear_keeps_handles() {
        let cache = BuildCache::default();
        let held = build(&cache, "a", 5);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(*held.value, 5);
        assert_eq!(build(&cache, "a", 6).origin, Origin::Built);
    }

    #[test]
    fn test_lru_eviction_skips_held_entries() {
        let cache = BuildCache::new(CacheConfig::with_capacity(2));
        let held = build(&cache, "a", 1);
        drop(build(&cache, "b", 2));
        drop(build(&cache, "c", 3));

        // "a" is older but still held, so "b" goes
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&h("a")));
        assert!(!cache.contains(&h("b")));
        assert!(cache.contains(&h("c")));
        assert_eq!(cache.stats().evictions, 1);
        drop(held);
    }

    #[test]
    fn test_retain_used_since() {
        let cache = BuildCache::default();
        drop(build(&cache, "old", 1));
        let mark = cache.current_tick() + 1;
        drop(build(&cache, "new", 2));
        let held = build(&cache, "kept", 3);
        drop(build(&cache, "old", 1));

        assert_eq!(cache.retain_used_since(mark), 0);
        assert_eq!(cache.len(), 3);

        let later = cache.current_tick() + 1;
        drop(build(&cache, "new", 2));
        assert_eq!(cache.retain_used_since(later), 1);
        assert!(cache.contains(&h("new")));
        assert!(cache.contains(&h("kept")));
        assert!(!cache.contains(&h("old")));
        drop(held);
    }

    #[test]
    fn test_summary_order_and_display() {
        let cache = BuildCache::default();
        drop(build(&cache, "a", 1));
        drop(build(&cache, "b", 2));
        drop(build(&cache, "a", 1));

        let summary = cache.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.entries[0].hash, h("b"));
        assert_eq!(summary.entries[1].uses, 2);
        assert_eq!(summary.total_uses(), 3);
        assert!(summary.to_string().contains("2 entries"));
    }
}
