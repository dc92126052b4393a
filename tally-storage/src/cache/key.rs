//! Deterministic cache key derivation.
//!
//! Keys encode the query shape, never request-local state, so every replica
//! derives the same key for the same query. Multi-id comparison keys hash
//! the canonicalized id set with SHA-256: two different id sets can never
//! collide the way delimiter-joined strings can (e.g. `{1, 23}` vs `{12, 3}`).

use sha2::{Digest, Sha256};

/// Glob pattern matching every list-query entry.
pub const LIST_PATTERN: &str = "items:list:*";

/// Glob pattern matching every id-set comparison entry.
pub const COMPARISON_PATTERN: &str = "items:cmp:*";

/// A cache key for one query shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Single record by id.
    Record { id: u64 },
    /// One list page.
    Page { page: usize, size: usize },
    /// The unpaged full listing.
    All,
    /// Comparison over an arbitrary id set (canonicalized: sorted, deduped).
    Comparison { ids: Vec<u64> },
}

impl CacheKey {
    /// Key for a single record.
    pub fn record(id: u64) -> Self {
        Self::Record { id }
    }

    /// Key for one list page.
    pub fn page(page: usize, size: usize) -> Self {
        Self::Page { page, size }
    }

    /// Key for the full listing.
    pub fn all() -> Self {
        Self::All
    }

    /// Key for an id-set comparison. The input order does not matter.
    pub fn comparison(ids: impl IntoIterator<Item = u64>) -> Self {
        let mut ids: Vec<u64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self::Comparison { ids }
    }

    /// Render the backend key string.
    pub fn key(&self) -> String {
        match self {
            Self::Record { id } => format!("item:{}", id),
            Self::Page { page, size } => format!("items:list:p{}:s{}", page, size),
            Self::All => "items:list:all".to_string(),
            Self::Comparison { ids } => {
                let mut hasher = Sha256::new();
                for id in ids {
                    hasher.update(id.to_le_bytes());
                }
                format!("items:cmp:{}", hex::encode(hasher.finalize()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_page_keys_are_literal() {
        assert_eq!(CacheKey::record(7).key(), "item:7");
        assert_eq!(CacheKey::page(2, 25).key(), "items:list:p2:s25");
        assert_eq!(CacheKey::all().key(), "items:list:all");
    }

    #[test]
    fn test_comparison_key_is_order_independent() {
        let a = CacheKey::comparison([3, 1, 2]);
        let b = CacheKey::comparison([2, 3, 1, 1]);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_comparison_key_resists_delimiter_adjacent_collisions() {
        // As text, "1" + "23" and "12" + "3" could collide; hashed binary
        // encodings must not.
        let a = CacheKey::comparison([1, 23]);
        let b = CacheKey::comparison([12, 3]);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_list_keys_match_the_list_pattern_shape() {
        assert!(CacheKey::page(0, 10).key().starts_with("items:list:"));
        assert!(CacheKey::all().key().starts_with("items:list:"));
        assert!(CacheKey::comparison([1]).key().starts_with("items:cmp:"));
        // Record keys must NOT be swept by list invalidation.
        assert!(!CacheKey::record(1).key().starts_with("items:list:"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: key derivation is deterministic and canonical over
        /// input order and duplicates.
        #[test]
        fn prop_comparison_canonical(mut ids in proptest::collection::vec(any::<u64>(), 0..16)) {
            let forward = CacheKey::comparison(ids.clone());
            ids.reverse();
            let mut doubled = ids.clone();
            doubled.extend_from_slice(&ids);
            let backward = CacheKey::comparison(doubled);
            prop_assert_eq!(forward.key(), backward.key());
        }

        /// Property: different id sets derive different keys.
        #[test]
        fn prop_comparison_injective(
            a in proptest::collection::btree_set(any::<u64>(), 0..12),
            b in proptest::collection::btree_set(any::<u64>(), 0..12),
        ) {
            let ka = CacheKey::comparison(a.iter().copied()).key();
            let kb = CacheKey::comparison(b.iter().copied()).key();
            if a == b {
                prop_assert_eq!(ka, kb);
            } else {
                prop_assert_ne!(ka, kb);
            }
        }
    }
}
