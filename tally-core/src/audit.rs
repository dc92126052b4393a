//! Audit log sink abstraction.
//!
//! Mutations on the store are reported to an injected [`AuditLogSink`]
//! rather than a process-wide list. Tests use [`InMemoryAuditLog`];
//! production wires a durable sink such as [`JsonlAuditLog`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;
use uuid::Uuid;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Recovered,
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub event_id: Uuid,
    /// When the event was recorded.
    pub at: DateTime<Utc>,
    /// The action taken.
    pub action: AuditAction,
    /// The record the action applied to.
    pub record_id: u64,
    /// Free-form detail, e.g. the version transition.
    pub detail: String,
}

impl AuditEvent {
    /// Create a new event stamped with a v7 UUID and the current time.
    pub fn new(action: AuditAction, record_id: u64, detail: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            at: Utc::now(),
            action,
            record_id,
            detail: detail.into(),
        }
    }
}

/// Sink for audit events.
///
/// Sink failures must not fail the mutation that produced the event; callers
/// log the error and continue.
#[async_trait]
pub trait AuditLogSink: Send + Sync {
    /// Record one event.
    async fn record(&self, event: AuditEvent) -> std::io::Result<()>;
}

/// In-memory audit log for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    ///
    /// A poisoned lock yields whatever was recorded before the panic; an
    /// audit read must not propagate someone else's crash.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditLogSink for InMemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> std::io::Result<()> {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
        Ok(())
    }
}

/// Durable audit log: one serde_json line appended per event.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    /// Create a sink appending to the given file, creating it if absent.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditLogSink for JsonlAuditLog {
    async fn record(&self, event: AuditEvent) -> std::io::Result<()> {
        let line = serde_json::to_string(&event).map_err(std::io::Error::other)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }
}
