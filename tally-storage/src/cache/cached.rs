//! Caching [`RecordStore`] decorator.
//!
//! Wraps any store with the cache-aside layer: reads populate keyed cache
//! entries, confirmed mutations evict them. Invalidation is targeted — a
//! mutation drops the record's own entry plus every list and comparison
//! entry, since any of those may now embed stale data.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tally_core::record::FlatRecord;
use tally_core::{CacheTtlConfig, TallyResult};

use super::aside::CacheAside;
use super::key::{CacheKey, COMPARISON_PATTERN, LIST_PATTERN};
use super::traits::CacheBackend;
use crate::store::RecordStore;

/// A [`RecordStore`] decorator that serves reads through a cache.
pub struct CachedStore<R, S, C>
where
    S: RecordStore<R>,
    C: CacheBackend,
    R: FlatRecord,
{
    inner: S,
    cache: CacheAside<C>,
    ttl: CacheTtlConfig,
    _record: PhantomData<fn() -> R>,
}

impl<R, S, C> CachedStore<R, S, C>
where
    R: FlatRecord + Serialize + DeserializeOwned,
    S: RecordStore<R>,
    C: CacheBackend,
{
    /// Wrap `inner` with a cache on `backend`.
    pub fn new(inner: S, backend: Arc<C>, ttl: CacheTtlConfig) -> Self {
        Self {
            inner,
            cache: CacheAside::new(backend),
            ttl,
            _record: PhantomData,
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// One page of records, cached per `(page, size)`.
    ///
    /// Pages are 1-based; an out-of-range page yields an empty vec.
    pub async fn get_page(&self, page: usize, size: usize) -> TallyResult<Vec<R>> {
        let key = CacheKey::page(page, size).key();
        let cached = self
            .cache
            .get_or_populate(&key, self.ttl.list_ttl, || async {
                let all = self.inner.get_all().await?;
                let start = page.saturating_sub(1).saturating_mul(size);
                let page: Vec<R> = all.into_iter().skip(start).take(size).collect();
                Ok(Some(page))
            })
            .await?;
        Ok(cached.unwrap_or_default())
    }

    /// The records whose ids are in `ids`, cached under a key derived from
    /// the id set. Missing ids are silently omitted.
    pub async fn get_many(&self, ids: &[u64]) -> TallyResult<Vec<R>> {
        let key = CacheKey::comparison(ids.iter().copied()).key();
        let cached = self
            .cache
            .get_or_populate(&key, self.ttl.comparison_ttl, || async {
                let all = self.inner.get_all().await?;
                let wanted: Vec<R> = all
                    .into_iter()
                    .filter(|r| ids.contains(&r.id()))
                    .collect();
                Ok(Some(wanted))
            })
            .await?;
        Ok(cached.unwrap_or_default())
    }

    /// Evict everything a mutation of `id` could have staled: the record's
    /// own entry and all list/comparison entries.
    async fn invalidate_for(&self, id: u64) {
        self.cache.invalidate(&CacheKey::record(id).key()).await;
        self.cache.invalidate_matching(LIST_PATTERN).await;
        self.cache.invalidate_matching(COMPARISON_PATTERN).await;
    }
}

#[async_trait]
impl<R, S, C> RecordStore<R> for CachedStore<R, S, C>
where
    R: FlatRecord + Serialize + DeserializeOwned,
    S: RecordStore<R>,
    C: CacheBackend,
{
    async fn get(&self, id: u64) -> TallyResult<Option<R>> {
        let key = CacheKey::record(id).key();
        self.cache
            .get_or_populate(&key, self.ttl.record_ttl, || self.inner.get(id))
            .await
    }

    async fn get_all(&self) -> TallyResult<Vec<R>> {
        let key = CacheKey::all().key();
        let cached = self
            .cache
            .get_or_populate(&key, self.ttl.list_ttl, || async {
                self.inner.get_all().await.map(Some)
            })
            .await?;
        Ok(cached.unwrap_or_default())
    }

    async fn create(&self, record: R) -> TallyResult<R> {
        let created = self.inner.create(record).await?;
        self.invalidate_for(created.id()).await;
        Ok(created)
    }

    async fn update(&self, record: R) -> TallyResult<R> {
        let updated = self.inner.update(record).await?;
        self.invalidate_for(updated.id()).await;
        Ok(updated)
    }

    async fn delete(&self, id: u64) -> TallyResult<()> {
        self.inner.delete(id).await?;
        self.invalidate_for(id).await;
        Ok(())
    }
}
