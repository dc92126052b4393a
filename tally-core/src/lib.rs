//! TALLY Core - Entity Types, Errors, and Configuration
//!
//! Defines the shared vocabulary of the TALLY record store: the
//! [`FlatRecord`] seam between entities and the flat-file storage layer,
//! the error taxonomy, configuration surfaces, and the audit log sink.
//! The storage engine itself lives in `tally-storage`.

pub mod audit;
pub mod config;
pub mod error;
pub mod item;
pub mod record;

pub use audit::{AuditAction, AuditEvent, AuditLogSink, InMemoryAuditLog, JsonlAuditLog};
pub use config::{BackupConfig, CacheTtlConfig, RetryConfig};
pub use error::{CacheError, CodecError, ConfigError, StoreError, TallyError, TallyResult};
pub use item::Item;
pub use record::FlatRecord;
