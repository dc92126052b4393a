//! Flat-file entity store.
//!
//! One store file shared by any number of threads and process instances.
//! OS file locks are the only coordination primitive: scans take a shared
//! lock, mutations take an exclusive lock for the whole read-modify-write
//! cycle. An in-process mutex would not help here because other process
//! instances write the same file.
//!
//! "Currently locked" is reported as a transient [`StoreError::LockContention`]
//! instead of blocking, so callers bound their latency through the retry
//! layer and cannot deadlock against the integrity service.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_core::{
    AuditAction, AuditEvent, AuditLogSink, FlatRecord, StoreError, TallyResult,
};

use crate::codec;

/// Async CRUD surface of the entity store.
///
/// `create` returns the stored record (with its assigned id and version 0);
/// `update` returns the record with its bumped version so callers can chase
/// writes without a re-read.
#[async_trait]
pub trait RecordStore<R: FlatRecord>: Send + Sync {
    /// Point lookup by id.
    async fn get(&self, id: u64) -> TallyResult<Option<R>>;

    /// Full scan of all parseable records.
    async fn get_all(&self) -> TallyResult<Vec<R>>;

    /// Append a new record at version 0.
    ///
    /// An id of 0 requests server-side assignment (`max(existing) + 1`).
    /// A client-supplied id that already exists returns the stored record
    /// unchanged: re-submissions are idempotent by design.
    async fn create(&self, record: R) -> TallyResult<R>;

    /// Update an existing record under optimistic concurrency control.
    ///
    /// The record's version must equal the stored version or the update is
    /// rejected with [`StoreError::ConcurrencyConflict`] and nothing is
    /// written. That error is semantic and must never be auto-retried.
    async fn update(&self, record: R) -> TallyResult<R>;

    /// Remove a record. Deleting an absent id is not an error here;
    /// idempotence is enforced one layer up.
    async fn delete(&self, id: u64) -> TallyResult<()>;
}

/// File-backed record store.
pub struct FlatFileStore<R> {
    path: PathBuf,
    audit: Arc<dyn AuditLogSink>,
    _record: PhantomData<fn() -> R>,
}

impl<R: FlatRecord> FlatFileStore<R> {
    /// Create a store over the given file path with an injected audit sink.
    ///
    /// The file itself is created lazily, before the first operation that
    /// needs it.
    pub fn new(path: impl Into<PathBuf>, audit: Arc<dyn AuditLogSink>) -> Self {
        Self {
            path: path.into(),
            audit,
            _record: PhantomData,
        }
    }

    /// The store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, e: &std::io::Error) -> StoreError {
        StoreError::StorageUnavailable {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }

    /// Map a lock acquisition failure: contention is transient, anything
    /// else is fatal.
    fn lock_error(&self, e: std::io::Error) -> StoreError {
        if e.kind() == fs2::lock_contended_error().kind() {
            StoreError::LockContention { attempts: 1 }
        } else {
            self.unavailable(&e)
        }
    }

    /// Guarantee the store file exists with its header line.
    ///
    /// Uses `create_new` so concurrent first accesses race safely: the loser
    /// sees `AlreadyExists` and must not truncate what the winner wrote.
    fn ensure_file(&self) -> Result<(), StoreError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", R::HEADER).map_err(|e| self.unavailable(&e))?;
                file.sync_all().map_err(|e| self.unavailable(&e))?;
                tracing::info!(path = %self.path.display(), "Created store file with header");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(self.unavailable(&e)),
        }
    }

    /// Open the file with a shared lock for a consistent scan.
    fn open_shared(&self) -> Result<File, StoreError> {
        let file = File::open(&self.path).map_err(|e| self.unavailable(&e))?;
        FileExt::try_lock_shared(&file).map_err(|e| self.lock_error(e))?;
        Ok(file)
    }

    /// Open the file read-write with an exclusive lock for a full
    /// read-modify-write cycle.
    fn open_exclusive(&self) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.unavailable(&e))?;
        FileExt::try_lock_exclusive(&file).map_err(|e| self.lock_error(e))?;
        Ok(file)
    }

    /// Read and decode every record in the locked file.
    ///
    /// Malformed lines are logged and skipped; they never abort the scan.
    fn read_records(&self, file: &mut File) -> Result<Vec<R>, StoreError> {
        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| self.unavailable(&e))?;

        let mut records = Vec::new();
        for (line_no, line) in codec::logical_lines(&content).iter().enumerate() {
            // Line 0 is the header; blank lines are ignored.
            if line_no == 0 || line.trim().is_empty() {
                continue;
            }
            match codec::decode_record::<R>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line_no,
                        error = %e,
                        "Skipping malformed record line"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Rewrite the whole file (header plus records) under the held
    /// exclusive lock.
    fn write_records(&self, file: &mut File, records: &[R]) -> Result<(), StoreError> {
        file.set_len(0).map_err(|e| self.unavailable(&e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| self.unavailable(&e))?;

        let mut content = String::with_capacity(records.len() * 64);
        content.push_str(R::HEADER);
        content.push('\n');
        for record in records {
            content.push_str(&codec::encode_record(record));
            content.push('\n');
        }
        file.write_all(content.as_bytes())
            .map_err(|e| self.unavailable(&e))?;
        file.sync_all().map_err(|e| self.unavailable(&e))
    }

    /// Append one record line at the end of the locked file.
    fn append_record(&self, file: &mut File, record: &R) -> Result<(), StoreError> {
        file.seek(SeekFrom::End(0)).map_err(|e| self.unavailable(&e))?;
        let line = format!("{}\n", codec::encode_record(record));
        file.write_all(line.as_bytes())
            .map_err(|e| self.unavailable(&e))?;
        file.sync_all().map_err(|e| self.unavailable(&e))
    }

    async fn record_audit(&self, action: AuditAction, record_id: u64, detail: String) {
        let event = AuditEvent::new(action, record_id, detail);
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!(error = %e, record_id, "Failed to record audit event");
        }
    }
}

#[async_trait]
impl<R: FlatRecord> RecordStore<R> for FlatFileStore<R> {
    async fn get(&self, id: u64) -> TallyResult<Option<R>> {
        self.ensure_file()?;
        let mut file = self.open_shared()?;
        let records = self.read_records(&mut file)?;
        Ok(records.into_iter().find(|r| r.id() == id))
    }

    async fn get_all(&self) -> TallyResult<Vec<R>> {
        self.ensure_file()?;
        let mut file = self.open_shared()?;
        Ok(self.read_records(&mut file)?)
    }

    async fn create(&self, mut record: R) -> TallyResult<R> {
        self.ensure_file()?;
        let mut file = self.open_exclusive()?;
        let records = self.read_records(&mut file)?;

        if record.id() != 0 {
            if let Some(existing) = records.iter().find(|r| r.id() == record.id()) {
                // Idempotent create: a re-submitted id returns the stored
                // record. The check is id-only; differing payloads are
                // surfaced in the log, not rejected.
                let mut submitted = record.clone();
                submitted.set_version(existing.version());
                if submitted != *existing {
                    tracing::warn!(
                        record_id = record.id(),
                        "Idempotent create matched an existing id with different fields"
                    );
                }
                return Ok(existing.clone());
            }
        } else {
            let next_id = records.iter().map(|r| r.id()).max().unwrap_or(0) + 1;
            record.set_id(next_id);
        }

        record.set_version(0);
        self.append_record(&mut file, &record)?;
        drop(file);

        self.record_audit(AuditAction::Created, record.id(), "version 0".to_string())
            .await;
        Ok(record)
    }

    async fn update(&self, mut record: R) -> TallyResult<R> {
        self.ensure_file()?;
        let mut file = self.open_exclusive()?;
        let mut records = self.read_records(&mut file)?;

        let position = records
            .iter()
            .position(|r| r.id() == record.id())
            .ok_or(StoreError::NotFound { id: record.id() })?;

        let stored_version = records[position].version();
        if stored_version != record.version() {
            // Nothing is written; the caller must re-fetch and retry
            // deliberately.
            return Err(StoreError::ConcurrencyConflict {
                id: record.id(),
                expected: record.version(),
                actual: stored_version,
            }
            .into());
        }

        record.set_version(stored_version + 1);
        records[position] = record.clone();
        self.write_records(&mut file, &records)?;
        drop(file);

        self.record_audit(
            AuditAction::Updated,
            record.id(),
            format!("version {} -> {}", stored_version, stored_version + 1),
        )
        .await;
        Ok(record)
    }

    async fn delete(&self, id: u64) -> TallyResult<()> {
        self.ensure_file()?;
        let mut file = self.open_exclusive()?;
        let mut records = self.read_records(&mut file)?;

        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            tracing::debug!(record_id = id, "Delete of absent record is a no-op");
            return Ok(());
        }

        self.write_records(&mut file, &records)?;
        drop(file);

        self.record_audit(AuditAction::Deleted, id, "removed".to_string()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{InMemoryAuditLog, Item, TallyError};
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> (FlatFileStore<Item>, Arc<InMemoryAuditLog>) {
        let audit = Arc::new(InMemoryAuditLog::new());
        let store = FlatFileStore::new(dir.path().join("items.csv"), audit.clone());
        (store, audit)
    }

    #[tokio::test]
    async fn test_create_assigns_next_id_and_version_zero() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        let a = store.create(Item::new("A", "first", 1.0)).await.unwrap();
        let b = store.create(Item::new("B", "second", 2.0)).await.unwrap();
        assert_eq!(a.item_id, 1);
        assert_eq!(b.item_id, 2);
        assert_eq!(a.version, 0);

        let fetched = store.get(a.item_id).await.unwrap().unwrap();
        assert_eq!(fetched, a);
    }

    #[tokio::test]
    async fn test_client_supplied_id_create_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (store, audit) = store_in(&dir);

        let first = store
            .create(Item::with_id(42, "X", "original", 10.0))
            .await
            .unwrap();
        let again = store
            .create(Item::with_id(42, "X", "resubmitted with drift", 11.0))
            .await
            .unwrap();

        // The stored record wins; nothing is overwritten.
        assert_eq!(again, first);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
        // Only the first create hit the audit log.
        assert_eq!(audit.events().len(), 1);
    }

    #[tokio::test]
    async fn test_update_bumps_version_by_exactly_one() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        let mut item = store.create(Item::new("X", "d", 10.0)).await.unwrap();
        item.price = 12.0;
        let updated = store.update(item).await.unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.price, 12.0);

        let stored = store.get(updated.item_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.price, 12.0);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        let created = store.create(Item::new("X", "d", 10.0)).await.unwrap();

        let mut fresh = created.clone();
        fresh.price = 12.0;
        store.update(fresh).await.unwrap();

        // Resubmit with the stale expected version 0.
        let mut stale = created.clone();
        stale.price = 99.0;
        let err = store.update(stale).await.unwrap_err();
        match err {
            TallyError::Store(StoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }

        let stored = store.get(created.item_id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.price, 12.0);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        let err = store
            .update(Item::with_id(404, "ghost", "", 0.0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TallyError::Store(StoreError::NotFound { id: 404 })
        ));
    }

    #[tokio::test]
    async fn test_delete_absent_id_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (store, audit) = store_in(&dir);

        store.create(Item::new("A", "", 1.0)).await.unwrap();
        store.delete(999).await.unwrap();

        assert_eq!(store.get_all().await.unwrap().len(), 1);
        // No Deleted event for the no-op.
        assert!(audit
            .events()
            .iter()
            .all(|e| e.action != tally_core::AuditAction::Deleted));
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one_record() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        let a = store.create(Item::new("A", "", 1.0)).await.unwrap();
        store.create(Item::new("B", "", 2.0)).await.unwrap();
        store.delete(a.item_id).await.unwrap();

        let remaining = store.get_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(store.get(a.item_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        store.create(Item::new("A", "", 1.0)).await.unwrap();
        // Inject a wrong-arity line and a garbage numeric by hand.
        let path = dir.path().join("items.csv");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("7,only-two-fields\n");
        content.push_str("8,B,desc,not-a-price,0\n");
        std::fs::write(&path, content).unwrap();

        let records = store.get_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "A");
    }

    #[tokio::test]
    async fn test_records_after_a_stray_quote_line_still_scan() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        // A hand-mangled wrong-arity line with an unbalanced quote sits
        // between two valid records; only it may be lost.
        let content = "Id,Name,Description,Price,Version\n\
                       1,A,,1,0\n\
                       2,bro\"ken\n\
                       3,C,,3,0\n";
        std::fs::write(dir.path().join("items.csv"), content).unwrap();

        let records = store.get_all().await.unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_missing_file_is_recreated_with_header() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);

        assert!(store.get_all().await.unwrap().is_empty());
        let content = std::fs::read_to_string(dir.path().join("items.csv")).unwrap();
        assert_eq!(content.trim_end(), Item::HEADER);
    }

    #[tokio::test]
    async fn test_absent_parent_directory_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let audit = Arc::new(InMemoryAuditLog::new());
        let store: FlatFileStore<Item> =
            FlatFileStore::new(dir.path().join("no-such-dir").join("items.csv"), audit);

        let err = store.get_all().await.unwrap_err();
        assert!(matches!(
            err,
            TallyError::Store(StoreError::StorageUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_exclusive_lock_holder_blocks_second_writer() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store_in(&dir);
        let item = store.create(Item::new("A", "", 1.0)).await.unwrap();

        // Hold the exclusive lock through an independent handle, the way a
        // second process instance would.
        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.path().join("items.csv"))
            .unwrap();
        FileExt::try_lock_exclusive(&holder).unwrap();

        let mut change = item.clone();
        change.price = 2.0;
        let err = store.update(change).await.unwrap_err();
        assert!(err.is_transient());

        fs2::FileExt::unlock(&holder).unwrap();
    }

    #[tokio::test]
    async fn test_mutations_emit_audit_events() {
        let dir = TempDir::new().unwrap();
        let (store, audit) = store_in(&dir);

        let mut item = store.create(Item::new("A", "", 1.0)).await.unwrap();
        item.name = "A2".to_string();
        let item = store.update(item).await.unwrap();
        store.delete(item.item_id).await.unwrap();

        let actions: Vec<_> = audit.events().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                tally_core::AuditAction::Created,
                tally_core::AuditAction::Updated,
                tally_core::AuditAction::Deleted,
            ]
        );
        assert!(audit.events()[1].detail.contains("0 -> 1"));
    }
}
