//! Tally Storage - Flat-File Record Store
//!
//! File-backed storage for line-oriented record types, coordinated across
//! processes with OS advisory file locks and optimistic versioning. The
//! core types live in tally-core; this crate provides:
//!
//! - `codec`: the delimited line format (quoting, logical line splitting)
//! - `store`: [`FlatFileStore`], the locked file store behind [`RecordStore`]
//! - `retry`: [`RetryingStore`], bounded linear-backoff retry of transient faults
//! - `cache`: [`CachedStore`], fail-open cache-aside reads with targeted invalidation
//! - `integrity`: the background snapshot / validate / recover task

pub mod cache;
pub mod codec;
pub mod integrity;
pub mod retry;
pub mod store;

pub use cache::{
    CacheAside, CacheBackend, CacheKey, CacheStats, CachedStore, InMemoryCacheBackend,
};
pub use integrity::{integrity_task, IntegrityMetrics, IntegritySnapshot};
pub use retry::{RetryPolicy, RetryingStore};
pub use store::{FlatFileStore, RecordStore};
