//! Fail-open cache-aside layer.
//!
//! Reads go cache-first and populate on miss; writes invalidate. Every
//! cache-infrastructure fault (backend down, poisoned payload) is logged
//! and degraded to the fetch path — the cache is never allowed to fail a
//! store operation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tally_core::TallyResult;

use super::traits::CacheBackend;

/// Cache-aside wrapper over a [`CacheBackend`].
pub struct CacheAside<C: CacheBackend> {
    backend: Arc<C>,
}

impl<C: CacheBackend> CacheAside<C> {
    /// Wrap a backend.
    pub fn new(backend: Arc<C>) -> Self {
        Self { backend }
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &C {
        &self.backend
    }

    /// Get the value for `key`, populating the cache from `fetch` on miss.
    ///
    /// A hit returns the cached value without calling `fetch`. On miss the
    /// fetched value is stored with `ttl` — but only when it is `Some`;
    /// absence is never cached. Store errors from `fetch` propagate; cache
    /// errors never do.
    pub async fn get_or_populate<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> TallyResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TallyResult<Option<T>>>,
    {
        match self.backend.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
                    if let Err(e) = self.backend.delete(key).await {
                        tracing::warn!(key, error = %e, "Failed to drop cache entry");
                    }
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, falling through to store");
            }
        }

        let fetched = fetch().await?;

        if let Some(value) = &fetched {
            match serde_json::to_vec(value) {
                Ok(bytes) => {
                    if let Err(e) = self.backend.set(key, bytes, ttl).await {
                        tracing::warn!(key, error = %e, "Cache write failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "Skipping cache of unserializable value");
                }
            }
        }
        Ok(fetched)
    }

    /// Remove one entry by exact key. Backend faults are absorbed.
    pub async fn invalidate(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(key, error = %e, "Cache invalidation failed");
        }
    }

    /// Remove every entry matching the glob pattern. Backend faults are
    /// absorbed; returns the removed count when the backend reports one.
    pub async fn invalidate_matching(&self, pattern: &str) -> u64 {
        match self.backend.delete_matching(pattern).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Cache pattern invalidation failed");
                0
            }
        }
    }
}

impl<C: CacheBackend> Clone for CacheAside<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}
