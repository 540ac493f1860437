//! Synchronizer: drains the operation queue, then reconciles every table with
//! the remote store.
//!
//! A pass moves Idle -> Draining -> Reconciling -> Idle. At most one pass runs
//! at a time; a pass requested while another runs returns
//! [`SyncOutcome::AlreadyRunning`] without side effects. Tables reconcile
//! one after another and a failing table never stops the others.

mod conflict;
mod connectivity;
pub mod resolver;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::error::{Error, RemoteError, Result};
use crate::models::{
    Filter, OperationKind, QueuedOperation, Record, RecordId, Resolutions, SyncStats, SyncStatus,
    TableName,
};
use crate::queue::{DrainReport, OperationQueue};
use crate::remote::RemoteStore;
use crate::store::{LocalStore, LAST_SYNC_SLOT, SYNC_STATS_SLOT};
use crate::util::{now_millis, BusyGuard};

pub use conflict::{ChannelConflictHandler, ConflictHandler, ConflictPrompt, UnattendedResolution};
pub use connectivity::Connectivity;
pub use resolver::{reconcile, Reconciliation, ResolvedConflict};

const EVENT_CAPACITY: usize = 64;

/// Reconciliation summary of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: TableName,
    /// Records stored locally after the merge
    pub merged: usize,
    pub pulled: usize,
    pub kept_local: usize,
    /// Ties settled by the conflict handler
    pub resolved: usize,
    /// Ties left untouched this round
    pub unresolved: usize,
    /// Why the table could not be reconciled
    pub error: Option<String>,
}

impl TableReport {
    fn failed(table: TableName, error: &Error) -> Self {
        Self {
            table,
            merged: 0,
            pulled: 0,
            kept_local: 0,
            resolved: 0,
            unresolved: 0,
            error: Some(error.to_string()),
        }
    }
}

/// Summary of one completed sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub drain: DrainReport,
    pub tables: Vec<TableReport>,
    pub started_at: i64,
    pub duration_ms: u64,
}

impl SyncReport {
    /// No replay failed and every table reconciled
    pub fn succeeded(&self) -> bool {
        self.drain.failed == 0 && self.tables.iter().all(|table| table.error.is_none())
    }

    pub fn unresolved_conflicts(&self) -> usize {
        self.tables.iter().map(|table| table.unresolved).sum()
    }
}

/// Result of asking for a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum SyncOutcome {
    Completed(SyncReport),
    AlreadyRunning,
}

/// Progress notifications broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    Started,
    TableRefreshed { table: TableName },
    ConflictsDetected { table: TableName, count: usize },
    Finished { report: SyncReport },
}

pub struct Synchronizer {
    store: Arc<LocalStore>,
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    unattended: UnattendedResolution,
    handler: RwLock<Option<Arc<dyn ConflictHandler>>>,
    in_progress: AtomicBool,
    table_locks: HashMap<TableName, Mutex<()>>,
    events: broadcast::Sender<SyncEvent>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
        unattended: UnattendedResolution,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            queue,
            remote,
            connectivity,
            unattended,
            handler: RwLock::new(None),
            in_progress: AtomicBool::new(false),
            table_locks: TableName::ALL
                .into_iter()
                .map(|table| (table, Mutex::new(())))
                .collect(),
            events,
        }
    }

    /// Install an interactive conflict handler; `None` restores the unattended policy.
    pub fn set_conflict_handler(&self, handler: Option<Arc<dyn ConflictHandler>>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn conflict_handler(&self) -> Arc<dyn ConflictHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| Arc::new(self.unattended) as Arc<dyn ConflictHandler>)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.connectivity.is_online(),
            queue_length: self.queue.peek_length(),
            sync_in_progress: self.is_running(),
            last_sync_timestamp: self.store.read_slot(LAST_SYNC_SLOT),
            dead_letter_count: self.queue.dead_letters().len(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        self.store.read_slot(SYNC_STATS_SLOT)
    }

    /// Run one full pass: drain the queue, then reconcile every table.
    pub async fn trigger_drain_and_reconcile(&self) -> Result<SyncOutcome> {
        if !self.connectivity.is_online() {
            return Err(Error::Offline);
        }
        let Some(_running) = BusyGuard::acquire(&self.in_progress) else {
            tracing::debug!("Sync already in progress; skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let started = Instant::now();
        let started_at = now_millis();
        self.emit(SyncEvent::Started);

        let drain = self.queue.drain(|operation| self.replay(operation)).await?;

        let mut tables = Vec::with_capacity(TableName::ALL.len());
        for table in TableName::ALL {
            let report = match self.reconcile_table(table).await {
                Ok(report) => report,
                Err(error) => {
                    tracing::warn!("Failed to reconcile {table}: {error}");
                    TableReport::failed(table, &error)
                }
            };
            tables.push(report);
        }

        let report = SyncReport {
            drain,
            tables,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        let succeeded = report.succeeded();
        self.store
            .update_slot(SYNC_STATS_SLOT, |stats: &mut SyncStats| {
                stats.record(succeeded, report.duration_ms);
            })?;
        self.store
            .write_slot(LAST_SYNC_SLOT, &Some(now_millis()))?;

        tracing::info!(
            "Sync finished in {}ms: {} replayed, {} failed, {} unresolved conflicts",
            report.duration_ms,
            report.drain.processed,
            report.drain.failed,
            report.unresolved_conflicts()
        );
        self.emit(SyncEvent::Finished {
            report: report.clone(),
        });
        Ok(SyncOutcome::Completed(report))
    }

    /// Replay one queued mutation against the remote store.
    async fn replay(&self, operation: QueuedOperation) -> Result<()> {
        let table = operation.table;
        tracing::debug!(
            "Replaying {} of {}/{}",
            operation.kind.name(),
            table,
            operation.record_id()
        );

        match operation.kind {
            OperationKind::Create { data } => {
                let local_id = data.id.clone();
                let stored = self.remote.create(table, data.to_payload()).await?;
                if stored.id != local_id {
                    self.queue.remap_record_id(table, &local_id, &stored.id)?;
                }
                let keep_local = self.queue.has_other_pending(table, &stored.id, operation.id);
                let replacement = match self.store.get(table, &local_id) {
                    Some(mut local) if keep_local => {
                        local.id = stored.id.clone();
                        local
                    }
                    _ => stored,
                };
                self.store.modify(table, |records| {
                    (rekey(records, &local_id, replacement), ())
                })
            }
            OperationKind::Update { record_id, updates } => {
                let stored = self.remote.update(table, &record_id, updates).await?;
                if !self.queue.has_other_pending(table, &record_id, operation.id) {
                    self.store.upsert(table, stored)?;
                }
                Ok(())
            }
            OperationKind::Delete { record_id } => {
                match self.remote.delete(table, &record_id).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => Ok(()),
                    Err(error) => Err(error.into()),
                }
            }
        }
    }

    async fn reconcile_table(&self, table: TableName) -> Result<TableReport> {
        let lock = self
            .table_locks
            .get(&table)
            .ok_or_else(|| Error::InvalidInput(format!("unregistered table {table}")))?;
        let _reconciling = lock.lock().await;

        let remote = self.remote.read(table, &Filter::new()).await?;
        let pending_deletes = self.queue.pending_deletes(table);

        let preview = reconcile(
            table,
            self.store.get_all(table),
            remote.clone(),
            &pending_deletes,
            &Resolutions::new(),
        );
        let handler = self.conflict_handler();
        let resolutions = if preview.conflicts.is_empty() {
            Resolutions::new()
        } else {
            self.emit(SyncEvent::ConflictsDetected {
                table,
                count: preview.conflicts.len(),
            });
            handler.resolve(table, preview.conflicts).await
        };

        // The handler may have awaited a user; deletes queued meanwhile must still count.
        let (merged, outcome) = self.store.modify_with_pending_deletes(table, |local, deleting| {
            let mut outcome = reconcile(table, local, remote, deleting, &resolutions);
            let merged = std::mem::take(&mut outcome.merged);
            let count = merged.len();
            (merged, (count, outcome))
        })?;

        for resolved in &outcome.resolved {
            let conflict = &resolved.conflict;
            self.store.record_conflict(
                table,
                &conflict.id,
                conflict.local.updated_at,
                conflict.remote.updated_at,
                &format!("{}-{}", handler.strategy(), resolved.resolution.as_str()),
            )?;
        }
        for record in outcome.push {
            self.push_local_winner(table, record).await?;
        }
        if !outcome.conflicts.is_empty() {
            tracing::warn!(
                "{} conflicts in {table} left unresolved this round",
                outcome.conflicts.len()
            );
        }

        self.emit(SyncEvent::TableRefreshed { table });
        Ok(TableReport {
            table,
            merged,
            pulled: outcome.pulled,
            kept_local: outcome.kept_local,
            resolved: outcome.resolved.len(),
            unresolved: outcome.conflicts.len(),
            error: None,
        })
    }

    /// Write a locally kept conflict winner back; queue it when that fails.
    async fn push_local_winner(&self, table: TableName, record: Record) -> Result<()> {
        let payload = record.to_payload();
        match self.remote.update(table, &record.id, payload.clone()).await {
            Ok(stored) => {
                if !self.queue.has_pending(table, &stored.id) {
                    self.store.upsert(table, stored)?;
                }
            }
            Err(error) => {
                tracing::debug!("Queueing resolved {table}/{} after push failed: {error}", record.id);
                self.queue.enqueue(
                    table,
                    OperationKind::Update {
                        record_id: record.id,
                        updates: payload,
                    },
                )?;
            }
        }
        Ok(())
    }
}

/// Put `replacement` where the record `from` (or an earlier copy of the
/// replacement id) sits, dropping any other copy of either id.
fn rekey(records: Vec<Record>, from: &RecordId, replacement: Record) -> Vec<Record> {
    let target = replacement.id.clone();
    let mut replacement = Some(replacement);
    let mut rekeyed = Vec::with_capacity(records.len() + 1);
    for record in records {
        if &record.id == from || record.id == target {
            if let Some(next) = replacement.take() {
                rekeyed.push(next);
            }
        } else {
            rekeyed.push(record);
        }
    }
    rekeyed.extend(replacement);
    rekeyed
}
