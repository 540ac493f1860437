//! Local store: per-table record cache usable without network access.
//!
//! Every table lives in its own JSON slot of the local `SQLite` database,
//! next to the slots for the operation queue and the scalar sync state.
//! Each call takes the connection lock for its whole read-modify-write, so
//! mutations of one table slot never interleave.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{
    ConflictRepository, Database, SlotRepository, SqliteConflictRepository, SqliteSlotRepository,
};
use crate::error::{Error, Result};
use crate::models::{Filter, QueuedOperation, Record, RecordId, SyncConflict, TableName};
use crate::queue::pending_delete_ids;
use crate::util::now_millis;

pub(crate) const QUEUE_SLOT: &str = "queue";
pub(crate) const DEAD_LETTER_SLOT: &str = "dead_letters";
pub(crate) const LAST_SYNC_SLOT: &str = "last_sync_timestamp";
pub(crate) const SYNC_STATS_SLOT: &str = "sync_stats";
pub(crate) const AUTO_SYNC_SLOT: &str = "auto_sync_enabled";

fn table_slot(table: TableName) -> String {
    format!("table:{table}")
}

/// Durable per-table record storage.
pub struct LocalStore {
    db: Mutex<Database>,
}

impl LocalStore {
    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open (or create) the store file at `path`.
    ///
    /// A file that is not a database is moved aside as
    /// `<name>.corrupt-<unix ms>` and a fresh store is created in its place.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Database::open(path) {
            Ok(db) => Ok(Self::new(db)),
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is not a database ({error}); starting over",
                    path.display()
                );
                quarantine_corrupted_db_files(path)?;
                Ok(Self::new(Database::open(path)?))
            }
            Err(error) => Err(error),
        }
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> T) -> T {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&db)
    }

    /// All cached records of a table, in insertion order. Never fails.
    pub fn get_all(&self, table: TableName) -> Vec<Record> {
        self.read_slot(&table_slot(table))
    }

    /// Records whose fields equal every condition of `filter`.
    pub fn get_by_filter(&self, table: TableName, filter: &Filter) -> Vec<Record> {
        let mut records = self.get_all(table);
        records.retain(|record| filter.matches(record));
        records
    }

    /// A single cached record.
    pub fn get(&self, table: TableName, id: &RecordId) -> Option<Record> {
        self.get_all(table)
            .into_iter()
            .find(|record| &record.id == id)
    }

    /// Insert the record, or replace the cached record with the same id in place.
    pub fn upsert(&self, table: TableName, record: Record) -> Result<()> {
        self.modify(table, |mut records| {
            if let Some(existing) = records.iter_mut().find(|existing| existing.id == record.id) {
                *existing = record;
            } else {
                records.push(record);
            }
            (records, ())
        })
    }

    /// Remove a record; absent ids are not an error.
    pub fn delete(&self, table: TableName, id: &RecordId) -> Result<()> {
        self.modify(table, |mut records| {
            records.retain(|record| &record.id != id);
            (records, ())
        })
    }

    /// Replace the whole table cache.
    pub fn replace_all(&self, table: TableName, records: Vec<Record>) -> Result<()> {
        self.modify(table, |_| (records, ()))
    }

    /// Atomic read-modify-write of one table.
    pub fn modify<R>(
        &self,
        table: TableName,
        f: impl FnOnce(Vec<Record>) -> (Vec<Record>, R),
    ) -> Result<R> {
        self.update_slot(&table_slot(table), |records: &mut Vec<Record>| {
            let (next, output) = f(std::mem::take(records));
            *records = next;
            output
        })
    }

    /// Like [`Self::modify`], with the ids that have a queued delete read
    /// from the queue slot under the same lock.
    ///
    /// A delete queued while a caller awaited something else is therefore
    /// always visible to `f`.
    pub(crate) fn modify_with_pending_deletes<R>(
        &self,
        table: TableName,
        f: impl FnOnce(Vec<Record>, &HashSet<RecordId>) -> (Vec<Record>, R),
    ) -> Result<R> {
        let key = table_slot(table);
        self.with_db(|db| {
            let queue: Vec<QueuedOperation> = load_slot(db, QUEUE_SLOT);
            let deleting = pending_delete_ids(&queue, table);
            let records: Vec<Record> = load_slot(db, &key);
            let (next, output) = f(records, &deleting);
            let raw = serde_json::to_string(&next)?;
            SqliteSlotRepository::new(db.connection()).set(&key, &raw)?;
            Ok(output)
        })
    }

    /// Resolved conflicts, newest first.
    pub fn conflict_log(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.with_db(|db| SqliteConflictRepository::new(db.connection()).list(limit))
    }

    pub(crate) fn record_conflict(
        &self,
        table: TableName,
        record_id: &RecordId,
        local_updated_at: i64,
        remote_updated_at: i64,
        strategy: &str,
    ) -> Result<()> {
        self.with_db(|db| {
            SqliteConflictRepository::new(db.connection()).record(
                table,
                record_id.as_str(),
                local_updated_at,
                remote_updated_at,
                strategy,
            )
        })
    }

    /// Read a typed slot; missing, unreadable or corrupt slots yield the default.
    pub(crate) fn read_slot<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.with_db(|db| load_slot(db, key))
    }

    pub(crate) fn write_slot<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.with_db(|db| SqliteSlotRepository::new(db.connection()).set(key, &raw))
    }

    /// Load, mutate and persist a typed slot under a single lock.
    pub(crate) fn update_slot<T, R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
    {
        self.with_db(|db| {
            let mut value: T = load_slot(db, key);
            let output = f(&mut value);
            let raw = serde_json::to_string(&value)?;
            SqliteSlotRepository::new(db.connection()).set(key, &raw)?;
            Ok(output)
        })
    }
}

fn is_corrupted_db_error(error: &Error) -> bool {
    matches!(
        error,
        Error::Database(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == rusqlite::ErrorCode::NotADatabase
    )
}

fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };

    if db_path.exists() {
        let backup_name = format!("{base_name}.corrupt-{}", now_millis());
        let backup_path = db_path.with_file_name(backup_name);
        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted local store from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) else {
        return Ok(());
    };
    let sidecar_prefix = format!("{base_name}-");
    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(&sidecar_prefix) {
            let path = entry.path();
            std::fs::remove_file(&path)?;
            tracing::warn!("Removed stale local store file {}", path.display());
        }
    }

    Ok(())
}

fn load_slot<T: DeserializeOwned + Default>(db: &Database, key: &str) -> T {
    match SqliteSlotRepository::new(db.connection()).get(key) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::warn!("Discarding corrupt local slot '{key}': {error}");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(error) => {
            tracing::warn!("Failed to read local slot '{key}': {error}");
            T::default()
        }
    }
}
