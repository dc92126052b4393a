//! Integrity & Recovery Background Service
//!
//! This module provides a background task that periodically snapshots the
//! store file and validates its shape, restoring from the newest snapshot
//! when the file goes missing or turns corrupt. Corruption can happen when:
//!
//! - A writer process dies mid-rewrite
//! - The file is truncated or edited out-of-band
//! - The volume runs out of space during a flush
//!
//! Each cycle runs validate-then-snapshot: a file that fails validation is
//! restored, never archived, so the snapshot set only ever contains files
//! that passed the shape check.
//!
//! All file access goes through the same advisory locks the store uses; a
//! cycle that cannot get a lock skips its work and tries again next tick
//! rather than blocking a live writer.

use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

use tally_core::audit::{AuditAction, AuditEvent, AuditLogSink};
use tally_core::record::FlatRecord;
use tally_core::BackupConfig;

use crate::codec::{logical_lines, split_line};

/// How many data lines a validation pass samples for field-count checks.
const VALIDATE_SAMPLE_LINES: usize = 5;

/// Timestamp format for snapshot file names. Lexicographic order equals
/// chronological order.
const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for the integrity service.
#[derive(Debug, Default)]
pub struct IntegrityMetrics {
    /// Total validation cycles completed
    pub cycles: AtomicU64,

    /// Total snapshots written since startup
    pub snapshots_taken: AtomicU64,

    /// Total cycles where the store file failed validation
    pub validations_failed: AtomicU64,

    /// Total successful restores from snapshot
    pub recoveries: AtomicU64,

    /// Total snapshots pruned past the retention limit
    pub snapshots_pruned: AtomicU64,

    /// Total errors encountered
    pub errors: AtomicU64,
}

impl IntegrityMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> IntegritySnapshot {
        IntegritySnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            snapshots_taken: self.snapshots_taken.load(Ordering::Relaxed),
            validations_failed: self.validations_failed.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            snapshots_pruned: self.snapshots_pruned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the integrity metrics.
#[derive(Debug, Clone)]
pub struct IntegritySnapshot {
    pub cycles: u64,
    pub snapshots_taken: u64,
    pub validations_failed: u64,
    pub recoveries: u64,
    pub snapshots_pruned: u64,
    pub errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that snapshots and validates a store file.
///
/// The task runs until the shutdown signal is received. After an initial
/// grace period (so it never races the store's own first-write file
/// creation), each tick:
///
/// 1. Reads the store file under a shared lock and validates its shape
/// 2. On a valid file, writes a timestamped snapshot and prunes old ones
/// 3. On a missing or corrupt file, restores the newest snapshot under an
///    exclusive lock, with bounded retries against live writers
///
/// # Arguments
///
/// * `store_path` - The store file to protect
/// * `config` - Intervals, retention, and retry bounds
/// * `audit` - Sink that receives a `Recovered` event per restore
/// * `shutdown_rx` - Watch receiver for shutdown signal
///
/// # Returns
///
/// Metrics collected during the task's lifetime
pub async fn integrity_task<R: FlatRecord>(
    store_path: PathBuf,
    config: BackupConfig,
    audit: Arc<dyn AuditLogSink>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<IntegrityMetrics> {
    let metrics = Arc::new(IntegrityMetrics::new());

    tracing::info!(
        path = %store_path.display(),
        startup_grace_secs = config.startup_grace.as_secs(),
        interval_secs = config.interval.as_secs(),
        max_snapshots = config.max_snapshots,
        "Integrity task started"
    );

    tokio::select! {
        _ = shutdown_rx.changed() => {
            if *shutdown_rx.borrow() {
                tracing::info!("Integrity task shutting down before first cycle");
                return metrics;
            }
        }
        _ = sleep(config.startup_grace) => {}
    }

    let mut tick = interval(config.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Integrity task shutting down");
                    break;
                }
            }

            _ = tick.tick() => {
                run_cycle::<R>(&store_path, &config, &audit, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        snapshots_taken = snapshot.snapshots_taken,
        validations_failed = snapshot.validations_failed,
        recoveries = snapshot.recoveries,
        errors = snapshot.errors,
        "Integrity task completed"
    );

    metrics
}

/// Perform one validate / snapshot / recover cycle.
async fn run_cycle<R: FlatRecord>(
    store_path: &Path,
    config: &BackupConfig,
    audit: &Arc<dyn AuditLogSink>,
    metrics: &IntegrityMetrics,
) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    let content = match read_locked(store_path) {
        Ok(FileRead::Content(content)) => Some(content),
        Ok(FileRead::Missing) => None,
        Ok(FileRead::Busy) => {
            // A writer holds the lock right now; the file is in good hands.
            tracing::debug!(path = %store_path.display(), "Store file busy, skipping cycle");
            return;
        }
        Err(e) => {
            tracing::error!(path = %store_path.display(), error = %e, "Failed to read store file");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let valid = content.as_deref().is_some_and(validate_store::<R>);

    if let Some(content) = content.filter(|_| valid) {
        match write_snapshot(store_path, config, &content) {
            Ok(path) => {
                metrics.snapshots_taken.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(snapshot = %path.display(), "Snapshot written");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to write snapshot");
                metrics.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        match prune_snapshots(store_path, config) {
            Ok(0) => {}
            Ok(pruned) => {
                metrics.snapshots_pruned.fetch_add(pruned, Ordering::Relaxed);
                tracing::debug!(pruned, "Pruned old snapshots");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to prune snapshots");
                metrics.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        return;
    }

    metrics.validations_failed.fetch_add(1, Ordering::Relaxed);
    tracing::warn!(
        path = %store_path.display(),
        "Store file missing or corrupt, attempting restore"
    );

    match restore_latest(store_path, config).await {
        Ok(Some(snapshot)) => {
            metrics.recoveries.fetch_add(1, Ordering::Relaxed);
            tracing::info!(snapshot = %snapshot.display(), "Store file restored from snapshot");
            let event = AuditEvent::new(
                AuditAction::Recovered,
                0,
                format!("restored from {}", snapshot.display()),
            );
            if let Err(e) = audit.record(event).await {
                tracing::warn!(error = %e, "Failed to record recovery audit event");
            }
        }
        Ok(None) => {
            tracing::warn!("No snapshot available to restore from");
        }
        Err(e) => {
            tracing::error!(error = %e, "Restore failed");
            metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// FILE OPERATIONS
// ============================================================================

/// Outcome of a lock-guarded read of the store file.
enum FileRead {
    Content(String),
    Missing,
    Busy,
}

/// Read the entire store file under a shared lock without blocking.
fn read_locked(path: &Path) -> std::io::Result<FileRead> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FileRead::Missing),
        Err(e) => return Err(e),
    };
    if let Err(e) = FileExt::try_lock_shared(&file) {
        if e.kind() == fs2::lock_contended_error().kind() {
            return Ok(FileRead::Busy);
        }
        return Err(e);
    }
    let mut content = String::new();
    let result = file.read_to_string(&mut content);
    let _ = FileExt::unlock(&file);
    result?;
    Ok(FileRead::Content(content))
}

/// Check that `content` looks like a store file for `R`: a non-empty file
/// whose first logical line is exactly the expected header and whose first
/// few data lines carry the expected field count.
fn validate_store<R: FlatRecord>(content: &str) -> bool {
    let lines = logical_lines(content);
    let Some(header) = lines.first() else {
        return false;
    };
    if header != R::HEADER {
        return false;
    }
    lines
        .iter()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .take(VALIDATE_SAMPLE_LINES)
        .all(|line| split_line(line, R::FIELD_COUNT).is_ok())
}

/// The directory snapshots live in, beside the store file.
fn snapshot_dir(store_path: &Path, config: &BackupConfig) -> PathBuf {
    store_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(&config.snapshot_dir)
}

/// The `name.` prefix shared by every snapshot of `store_path`.
fn snapshot_prefix(store_path: &Path) -> String {
    let name = store_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    format!("{name}.")
}

/// Write `content` as a new timestamped snapshot, creating the snapshot
/// directory on first use.
fn write_snapshot(
    store_path: &Path,
    config: &BackupConfig,
    content: &str,
) -> std::io::Result<PathBuf> {
    let dir = snapshot_dir(store_path, config);
    fs::create_dir_all(&dir)?;

    let stamp = Utc::now().format(SNAPSHOT_TIMESTAMP_FORMAT);
    let path = dir.join(format!("{}{stamp}", snapshot_prefix(store_path)));

    let mut file = File::create(&path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(path)
}

/// All snapshots for `store_path`, sorted oldest first.
fn list_snapshots(store_path: &Path, config: &BackupConfig) -> std::io::Result<Vec<PathBuf>> {
    let dir = snapshot_dir(store_path, config);
    let prefix = snapshot_prefix(store_path);

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut snapshots: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    // Timestamped names sort chronologically.
    snapshots.sort();
    Ok(snapshots)
}

/// Delete the oldest snapshots past the retention limit.
fn prune_snapshots(store_path: &Path, config: &BackupConfig) -> std::io::Result<u64> {
    let snapshots = list_snapshots(store_path, config)?;
    let excess = snapshots.len().saturating_sub(config.max_snapshots);

    let mut pruned = 0u64;
    for path in snapshots.into_iter().take(excess) {
        fs::remove_file(&path)?;
        pruned += 1;
    }
    Ok(pruned)
}

/// Overwrite the store file with the newest snapshot.
///
/// The target is locked exclusively before writing. A writer holding the
/// lock is an expected race, so contention is retried a bounded number of
/// times instead of treated as an error. Returns the snapshot restored
/// from, or `None` when there is nothing to restore.
async fn restore_latest(
    store_path: &Path,
    config: &BackupConfig,
) -> std::io::Result<Option<PathBuf>> {
    let snapshots = list_snapshots(store_path, config)?;
    let Some(newest) = snapshots.last() else {
        return Ok(None);
    };
    let content = fs::read_to_string(newest)?;

    for attempt in 1..=config.restore_attempts {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(store_path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
                file.write_all(content.as_bytes())?;
                file.sync_all()?;
                let _ = FileExt::unlock(&file);
                return Ok(Some(newest.clone()));
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                tracing::debug!(
                    attempt,
                    max_attempts = config.restore_attempts,
                    "Store file locked by a writer, delaying restore"
                );
                sleep(config.restore_delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::WouldBlock,
        "store file stayed locked through all restore attempts",
    ))
}

// ============================================================================
// TESTS
// ============================================================================
