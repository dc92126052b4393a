//! In-memory cache backend.
//!
//! Process-local implementation of [`CacheBackend`] with per-entry expiry
//! and glob-pattern deletion. Used by tests and by single-instance
//! deployments that do not run a distributed cache.

use async_trait::async_trait;
use globset::Glob;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tally_core::CacheError;

use super::traits::{CacheBackend, CacheStats};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Thread-safe in-memory cache with TTL expiry.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheBackend {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn backend_err(reason: &str) -> CacheError {
        CacheError::Backend {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Self::backend_err("cache lock poisoned"))?;
        let mut stats = self
            .stats
            .write()
            .map_err(|_| Self::backend_err("stats lock poisoned"))?;

        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                stats.hits += 1;
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                // Expired: drop it lazily on access.
                entries.remove(key);
                stats.misses += 1;
                Ok(None)
            }
            None => {
                stats.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Self::backend_err("cache lock poisoned"))?;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Self::backend_err("cache lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let matcher = Glob::new(pattern)
            .map_err(|e| CacheError::Backend {
                reason: format!("invalid glob pattern {pattern}: {e}"),
            })?
            .compile_matcher();

        let mut entries = self
            .entries
            .write()
            .map_err(|_| Self::backend_err("cache lock poisoned"))?;
        let before = entries.len();
        entries.retain(|key, _| !matcher.is_match(key));
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Self::backend_err("cache lock poisoned"))?;
        let stats = self
            .stats
            .read()
            .map_err(|_| Self::backend_err("stats lock poisoned"))?;
        Ok(CacheStats {
            entry_count: entries.len() as u64,
            ..stats.clone()
        })
    }
}
