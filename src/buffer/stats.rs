//! Buffer manager statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the buffer manager.
///
/// Every counter is an `AtomicU64` updated with `Ordering::Relaxed`; the
/// counters are independent of each other and only need atomicity.
///
/// # Example
/// ```
/// use slabpool::BufferManagerStats;
/// use std::sync::atomic::Ordering;
///
/// let stats = BufferManagerStats::new();
/// stats.spills.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(stats.snapshot().spills, 1);
/// ```
#[derive(Debug, Default)]
pub struct BufferManagerStats {
    /// Pin requests satisfied by a resident mini-page.
    pub cache_hits: AtomicU64,

    /// Pin requests that had to read the page back from disk.
    pub cache_misses: AtomicU64,

    /// Full pages reclaimed from the LRU.
    pub evictions: AtomicU64,

    /// Pages read from a set file or the scratch file.
    pub pages_read: AtomicU64,

    /// Named pages written to their set file.
    pub pages_written: AtomicU64,

    /// Anonymous pages written to the scratch file.
    pub spills: AtomicU64,
}

impl BufferManagerStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Hit rate over pin requests (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        self.snapshot().hit_rate()
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            spills: self.spills.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.cache_hits,
            &self.cache_misses,
            &self.evictions,
            &self.pages_read,
            &self.pages_written,
            &self.spills,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of [`BufferManagerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub pages_read: u64,
    pub pages_written: u64,
    pub spills: u64,
}

impl StatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats {{ hits: {}, misses: {}, evictions: {}, written: {}, spills: {}, hit_rate: {:.2}% }}",
            self.cache_hits,
            self.cache_misses,
            self.evictions,
            self.pages_written,
            self.spills,
            self.hit_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = BufferManagerStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_stats_hit_rate() {
        let stats = BufferManagerStats::new();
        stats.cache_hits.fetch_add(7, Ordering::Relaxed);
        stats.cache_misses.fetch_add(3, Ordering::Relaxed);

        assert_eq!(stats.hit_rate(), 0.7);
    }

    #[test]
    fn test_stats_bump_and_reset() {
        let stats = BufferManagerStats::new();
        BufferManagerStats::bump(&stats.spills);
        BufferManagerStats::bump(&stats.spills);
        BufferManagerStats::bump(&stats.evictions);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.spills, 2);
        assert_eq!(snapshot.evictions, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_stats_display() {
        let stats = BufferManagerStats::new();
        stats.cache_hits.fetch_add(80, Ordering::Relaxed);
        stats.cache_misses.fetch_add(20, Ordering::Relaxed);
        stats.spills.fetch_add(5, Ordering::Relaxed);

        let display = format!("{}", stats.snapshot());

        assert!(display.contains("hits: 80"));
        assert!(display.contains("spills: 5"));
        assert!(display.contains("80.00%"));
    }
}
