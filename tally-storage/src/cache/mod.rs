//! Read-through caching for record stores.
//!
//! # Design
//!
//! The cache sits beside the store, never in front of its correctness:
//! every entry is a disposable copy, and any cache fault degrades to a
//! store read. Keys are derived deterministically from the query shape
//! (see [`CacheKey`]) so that mutations can invalidate by glob pattern
//! without tracking individual entries.
//!
//! - [`CacheBackend`] — the storage seam (get/set/delete/pattern-delete)
//! - [`InMemoryCacheBackend`] — TTL'd hashmap backend
//! - [`CacheAside`] — fail-open get-or-populate over any backend
//! - [`CachedStore`] — a [`RecordStore`](crate::store::RecordStore)
//!   decorator wiring reads and invalidation together

mod aside;
mod cached;
mod key;
mod memory;
mod traits;

pub use aside::CacheAside;
pub use cached::CachedStore;
pub use key::{CacheKey, COMPARISON_PATTERN, LIST_PATTERN};
pub use memory::InMemoryCacheBackend;
pub use traits::{CacheBackend, CacheStats};
