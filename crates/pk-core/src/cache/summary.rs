use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::hash::FeatureHash;

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub failed_builds: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from the cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) builds: AtomicU64,
    pub(crate) failed_builds: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            failed_builds: self.failed_builds.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// One line of the cache report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub hash: FeatureHash,
    pub tag: &'static str,
    pub type_name: &'static str,
    pub uses: u64,
    pub last_used: u64,
    /// Some caller still holds the built value
    pub referenced: bool,
}

/// Report of the cache contents, least recently used first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSummary {
    pub entries: Vec<EntrySummary>,
    pub stats: CacheStats,
    pub capacity: Option<usize>,
}

impl CacheSummary {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the usage counts of all entries
    pub fn total_uses(&self) -> u64 {
        self.entries.iter().map(|e| e.uses).sum()
    }
}

impl fmt::Display for CacheSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.capacity {
            Some(cap) => writeln!(f, "Feature cache: {}/{} entries", self.entries.len(), cap)?,
            None => writeln!(f, "Feature cache: {} entries", self.entries.len())?,
        }
        writeln!(
            f,
            "  hits {} / misses {} ({:.0}% hit rate), {} builds, {} failed, {} evicted",
            self.stats.hits,
            self.stats.misses,
            self.stats.hit_rate() * 100.0,
            self.stats.builds,
            self.stats.failed_builds,
            self.stats.evictions
        )?;
        for entry in &self.entries {
            writeln!(
                f,
                "  {} {:<10} uses {:>4}  last used {:>6}{}",
                entry.hash,
                entry.tag,
                entry.uses,
                entry.last_used,
                if entry.referenced { "  (held)" } else { "" }
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_display_lists_entries() {
        let summary = CacheSummary {
            entries: vec![EntrySummary {
                hash: FeatureHash::from_bytes(b"x"),
                tag: "Box",
                type_name: "u32",
                uses: 2,
                last_used: 4,
                referenced: true,
            }],
            stats: CacheStats::default(),
            capacity: Some(8),
        };
        let text = summary.to_string();
        assert!(text.starts_with("Feature cache: 1/8 entries"));
        assert!(text.contains("Box"));
        assert!(text.contains("(held)"));
        assert_eq!(summary.total_uses(), 2);
    }
}
