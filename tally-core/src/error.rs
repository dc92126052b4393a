//! Error types for TALLY operations

use std::path::PathBuf;
use thiserror::Error;

/// Entity store errors.
///
/// These are the structural errors of the flat-file store. `NotFound` and
/// `ConcurrencyConflict` are semantic and propagate unchanged to the caller;
/// `LockContention` is transient and is absorbed by the retry layer up to its
/// bound; `StorageUnavailable` is fatal for the operation and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: id {id}")]
    NotFound { id: u64 },

    #[error("Concurrency conflict on record {id}: expected version {expected}, stored version {actual}")]
    ConcurrencyConflict {
        id: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Store file lock could not be acquired after {attempts} attempt(s)")]
    LockContention { attempts: u32 },

    #[error("Storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },
}

impl StoreError {
    /// Whether this error is transient lock contention that a bounded retry
    /// may resolve. Semantic errors (`NotFound`, `ConcurrencyConflict`) and
    /// fatal errors (`StorageUnavailable`) must never be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockContention { .. })
    }
}

/// Record codec errors.
///
/// A single malformed line yields one of these; scans log the error and skip
/// the line rather than aborting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Wrong field count: expected {expected}, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("Unclosed quote in record line")]
    UnclosedQuote,

    #[error("Failed to parse field {field}: {reason}")]
    FieldParse { field: &'static str, reason: String },
}

/// Cache backend errors.
///
/// The cache-aside layer absorbs every one of these locally (fail-open) and
/// falls through to the store; they never reach the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache (de)serialization error for key {key}: {reason}")]
    Serialization { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Master error type for all TALLY errors.
#[derive(Debug, Clone, Error)]
pub enum TallyError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TallyError {
    /// Whether the underlying error is transient (see [`StoreError::is_transient`]).
    pub fn is_transient(&self) -> bool {
        matches!(self, TallyError::Store(e) if e.is_transient())
    }
}

/// Result type alias for TALLY operations.
pub type TallyResult<T> = Result<T, TallyError>;

// =============================================================================
// TESTS
// =============================================================================
