//! Retry coordinator for transiently locked store files.
//!
//! Lock contention between concurrent actors (other threads, other process
//! instances, the integrity service) is expected and transient, so store
//! operations are wrapped with a bounded linear backoff. Semantic errors,
//! [`StoreError::ConcurrencyConflict`] above all, bypass the retry entirely:
//! they must reach the caller, who re-fetches and retries deliberately.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use tally_core::{FlatRecord, RetryConfig, StoreError, TallyResult};

use crate::store::RecordStore;

/// Bounded linear-backoff retry policy around store operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build a policy from a validated [`RetryConfig`].
    pub fn new(config: RetryConfig) -> TallyResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The underlying configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` with up to `max_attempts` tries.
    ///
    /// Attempt `k` waits `k * base_delay` after a transient failure. Any
    /// non-transient error returns immediately; exhausting the budget
    /// returns [`StoreError::LockContention`] carrying the attempt count.
    pub async fn run<T, F, Fut>(&self, op: &'static str, mut operation: F) -> TallyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TallyResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.base_delay * attempt;
                    tracing::debug!(
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Store file locked, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(op, attempts = attempt, "Retry budget exhausted");
                    return Err(StoreError::LockContention { attempts: attempt }.into());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A [`RecordStore`] wrapper applying a [`RetryPolicy`] to every operation.
pub struct RetryingStore<R: FlatRecord, S: RecordStore<R>> {
    inner: S,
    policy: RetryPolicy,
    _record: PhantomData<fn() -> R>,
}

impl<R: FlatRecord, S: RecordStore<R>> RetryingStore<R, S> {
    /// Wrap a store with the given retry configuration.
    pub fn new(inner: S, config: RetryConfig) -> TallyResult<Self> {
        Ok(Self {
            inner,
            policy: RetryPolicy::new(config)?,
            _record: PhantomData,
        })
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<R: FlatRecord, S: RecordStore<R>> RecordStore<R> for RetryingStore<R, S> {
    async fn get(&self, id: u64) -> TallyResult<Option<R>> {
        self.policy.run("get", || self.inner.get(id)).await
    }

    async fn get_all(&self) -> TallyResult<Vec<R>> {
        self.policy.run("get_all", || self.inner.get_all()).await
    }

    async fn create(&self, record: R) -> TallyResult<R> {
        self.policy
            .run("create", || self.inner.create(record.clone()))
            .await
    }

    async fn update(&self, record: R) -> TallyResult<R> {
        self.policy
            .run("update", || self.inner.update(record.clone()))
            .await
    }

    async fn delete(&self, id: u64) -> TallyResult<()> {
        self.policy.run("delete", || self.inner.delete(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlatFileStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, RwLock};
    use std::time::Duration;
    use tally_core::{InMemoryAuditLog, Item, TallyError};
    use tempfile::TempDir;

    fn fast_config() -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay(Duration::from_millis(5))
    }

    /// Store stub that reports lock contention a fixed number of times
    /// before delegating to an in-memory list.
    struct FlakyStore {
        failures_left: AtomicU32,
        calls: AtomicU32,
        items: RwLock<Vec<Item>>,
        conflict_on_update: bool,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                items: RwLock::new(Vec::new()),
                conflict_on_update: false,
            }
        }

        fn contend(&self) -> TallyResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::LockContention { attempts: 1 }.into());
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RecordStore<Item> for FlakyStore {
        async fn get(&self, id: u64) -> TallyResult<Option<Item>> {
            self.contend()?;
            Ok(self.items.read().unwrap().iter().find(|i| i.item_id == id).cloned())
        }

        async fn get_all(&self) -> TallyResult<Vec<Item>> {
            self.contend()?;
            Ok(self.items.read().unwrap().clone())
        }

        async fn create(&self, record: Item) -> TallyResult<Item> {
            self.contend()?;
            self.items.write().unwrap().push(record.clone());
            Ok(record)
        }

        async fn update(&self, record: Item) -> TallyResult<Item> {
            self.contend()?;
            if self.conflict_on_update {
                return Err(StoreError::ConcurrencyConflict {
                    id: record.item_id,
                    expected: record.version,
                    actual: record.version + 1,
                }
                .into());
            }
            Ok(record)
        }

        async fn delete(&self, _id: u64) -> TallyResult<()> {
            self.contend()?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transient_contention_is_retried_until_success() {
        let store = RetryingStore::new(FlakyStore::new(2), fast_config()).unwrap();
        let item = store.create(Item::with_id(1, "A", "", 1.0)).await.unwrap();
        assert_eq!(item.item_id, 1);
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_lock_contention() {
        let store = RetryingStore::new(FlakyStore::new(100), fast_config()).unwrap();
        let err = store.get(1).await.unwrap_err();
        match err {
            TallyError::Store(StoreError::LockContention { attempts }) => {
                assert_eq!(attempts, 5)
            }
            other => panic!("expected LockContention, got {other:?}"),
        }
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_concurrency_conflict_is_never_auto_retried() {
        let mut flaky = FlakyStore::new(0);
        flaky.conflict_on_update = true;
        let store = RetryingStore::new(flaky, fast_config()).unwrap();

        let err = store.update(Item::with_id(1, "A", "", 1.0)).await.unwrap_err();
        assert!(matches!(
            err,
            TallyError::Store(StoreError::ConcurrencyConflict { .. })
        ));
        // Exactly one attempt: semantic errors bypass the retry loop.
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempt_config_is_rejected() {
        let config = RetryConfig::new().with_max_attempts(0);
        assert!(RetryingStore::new(FlakyStore::new(0), config).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_exactly_one_wins() {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(InMemoryAuditLog::new());
        let path = dir.path().join("items.csv");

        let base: FlatFileStore<Item> = FlatFileStore::new(&path, audit.clone());
        let created = base.create(Item::new("X", "", 10.0)).await.unwrap();

        // Two independent store handles, as in two process instances.
        let store_a = Arc::new(
            RetryingStore::new(FlatFileStore::<Item>::new(&path, audit.clone()), fast_config())
                .unwrap(),
        );
        let store_b = Arc::new(
            RetryingStore::new(FlatFileStore::<Item>::new(&path, audit.clone()), fast_config())
                .unwrap(),
        );

        let mut update_a = created.clone();
        update_a.price = 12.0;
        let mut update_b = created.clone();
        update_b.price = 15.0;

        let task_a = tokio::spawn({
            let store = store_a.clone();
            async move { store.update(update_a).await }
        });
        let task_b = tokio::spawn({
            let store = store_b.clone();
            async move { store.update(update_b).await }
        });

        let results = [task_a.await.unwrap(), task_b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(TallyError::Store(StoreError::ConcurrencyConflict { .. }))
                )
            })
            .count();

        assert_eq!(wins, 1, "exactly one concurrent update must win");
        assert_eq!(conflicts, 1, "the loser must observe a version mismatch");

        let stored = base.get(created.item_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }
}
