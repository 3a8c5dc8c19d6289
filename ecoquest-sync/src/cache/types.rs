//! Statistics for cache and executor monitoring

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters maintained by the cache store and the executors
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from fresh cached data
    pub hits: u64,

    /// Reads that needed a fetch
    pub misses: u64,

    /// Network fetches actually started
    pub fetches: u64,

    /// Callers that joined an already in-flight fetch
    pub deduplicated: u64,

    /// Retry attempts after a failed fetch
    pub retries: u64,

    /// Fetches that settled with an error
    pub failures: u64,

    /// Entries marked stale by invalidation
    pub invalidations: u64,

    /// Optimistic patches undone after a failed mutation
    pub rollbacks: u64,

    /// Entries removed by the idle sweep
    pub evictions: u64,

    /// Number of entries currently in the store
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Share of fetch requests that were folded into an in-flight fetch
    pub fn dedup_rate(&self) -> f64 {
        let total = self.fetches + self.deduplicated;
        if total == 0 {
            0.0
        } else {
            (self.deduplicated as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, fetches: {}, deduplicated: {}, retries: {}, failures: {}, rollbacks: {}, entries: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.fetches,
            self.deduplicated,
            self.retries,
            self.failures,
            self.rollbacks,
            self.entries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
        assert_eq!(stats.dedup_rate(), 0.0);
    }

    #[test]
    fn test_dedup_rate() {
        let stats = CacheStats {
            fetches: 1,
            deduplicated: 3,
            ..Default::default()
        };
        assert_eq!(stats.dedup_rate(), 75.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            fetches: 50,
            rollbacks: 2,
            entries: 12,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
        assert!(display.contains("rollbacks: 2"));
    }
}
