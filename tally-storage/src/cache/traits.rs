//! Cache backend trait.
//!
//! Abstracts the assumed distributed-cache capability: get, set with TTL,
//! delete by exact key, and delete by glob pattern. The network client of a
//! real distributed backend is out of scope here; [`InMemoryCacheBackend`]
//! (`cache::memory`) implements the same contract in process.
//!
//! [`InMemoryCacheBackend`]: crate::cache::InMemoryCacheBackend

use async_trait::async_trait;
use std::time::Duration;
use tally_core::CacheError;

/// Pluggable cache backend.
///
/// Implementations must be thread-safe. Values are opaque bytes; the layer
/// above owns (de)serialization. Every fallible operation returns
/// [`CacheError`], which the cache-aside layer absorbs — a backend fault
/// must never fail a store operation.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value, or None on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store a value with a time-to-live.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove one entry by exact key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry whose key matches the glob pattern.
    ///
    /// Returns the number of entries removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (including expiries).
    pub misses: u64,
    /// Number of live entries.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
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
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty = CacheStats::default();
        assert!((empty.hit_rate() - 0.0).abs() < 0.001);
    }
}
