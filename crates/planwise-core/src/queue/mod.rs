//! Operation queue: durable, ordered list of mutations awaiting remote replay.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{OperationId, OperationKind, QueuedOperation, RecordId, TableName};
use crate::store::{LocalStore, DEAD_LETTER_SLOT, QUEUE_SLOT};
use crate::util::BusyGuard;

/// Default ceiling on permanent replay failures before an operation is parked.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Operations replayed successfully and removed
    pub processed: usize,
    /// Operations whose replay failed this pass (dead-lettered ones included)
    pub failed: usize,
    /// Operations moved to the dead-letter slot this pass
    pub dead_lettered: usize,
    /// Another drain was already running; nothing was replayed
    pub skipped: bool,
}

/// Durable FIFO of pending mutations, persisted in the local store's queue slot.
pub struct OperationQueue {
    store: Arc<LocalStore>,
    draining: AtomicBool,
    max_attempts: Option<u32>,
}

impl OperationQueue {
    pub const fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            draining: AtomicBool::new(false),
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }

    /// Set the retry ceiling; `None` keeps failing operations forever.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Append a mutation with a fresh id and timestamp. Durable before returning.
    pub fn enqueue(&self, table: TableName, kind: OperationKind) -> Result<QueuedOperation> {
        let operation = QueuedOperation::new(table, kind);
        let stored = operation.clone();
        self.store
            .update_slot(QUEUE_SLOT, |queue: &mut Vec<QueuedOperation>| queue.push(stored))?;
        tracing::debug!(
            "Queued {} for {}/{} ({})",
            operation.kind.name(),
            table,
            operation.record_id(),
            operation.id
        );
        Ok(operation)
    }

    /// Snapshot of the queue in enqueue order
    pub fn pending(&self) -> Vec<QueuedOperation> {
        self.store.read_slot(QUEUE_SLOT)
    }

    /// Pending operations of one table, in enqueue order
    pub fn pending_for(&self, table: TableName) -> Vec<QueuedOperation> {
        let mut pending = self.pending();
        pending.retain(|operation| operation.table == table);
        pending
    }

    /// Ids with a delete still waiting for replay
    pub fn pending_deletes(&self, table: TableName) -> HashSet<RecordId> {
        pending_delete_ids(&self.pending(), table)
    }

    /// Whether any pending operation targets the record
    pub fn has_pending(&self, table: TableName, record_id: &RecordId) -> bool {
        self.pending()
            .iter()
            .any(|operation| operation.table == table && operation.record_id() == record_id)
    }

    /// Whether an operation other than `except` targets the record
    pub fn has_other_pending(
        &self,
        table: TableName,
        record_id: &RecordId,
        except: OperationId,
    ) -> bool {
        self.pending().iter().any(|operation| {
            operation.id != except && operation.table == table && operation.record_id() == record_id
        })
    }

    pub fn peek_length(&self) -> usize {
        self.pending().len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn clear(&self) -> Result<()> {
        self.store
            .write_slot(QUEUE_SLOT, &Vec::<QueuedOperation>::new())
    }

    /// Point later operations at the id the server assigned to a replayed create.
    pub fn remap_record_id(&self, table: TableName, from: &RecordId, to: &RecordId) -> Result<usize> {
        self.store
            .update_slot(QUEUE_SLOT, |queue: &mut Vec<QueuedOperation>| {
                let mut remapped = 0;
                for operation in queue.iter_mut().filter(|op| op.table == table) {
                    match &mut operation.kind {
                        OperationKind::Create { data } if &data.id == from => {
                            data.id = to.clone();
                            remapped += 1;
                        }
                        OperationKind::Update { record_id, .. } | OperationKind::Delete { record_id }
                            if record_id == from =>
                        {
                            *record_id = to.clone();
                            remapped += 1;
                        }
                        _ => {}
                    }
                }
                remapped
            })
    }

    /// Replay every queued operation in enqueue order through `executor`.
    ///
    /// Successful operations are removed. Failed ones stay in place, keeping
    /// their relative order, unless they hit the retry ceiling. Operations
    /// enqueued while the drain runs are left for the next drain. A call made
    /// while another drain is running returns a skipped report.
    pub async fn drain<F, Fut>(&self, mut executor: F) -> Result<DrainReport>
    where
        F: FnMut(QueuedOperation) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(_draining) = BusyGuard::acquire(&self.draining) else {
            tracing::debug!("Queue drain already in progress; skipping");
            return Ok(DrainReport {
                skipped: true,
                ..DrainReport::default()
            });
        };

        let mut report = DrainReport::default();
        for operation in self.pending() {
            let id = operation.id;
            match executor(operation).await {
                Ok(()) => {
                    self.remove(id)?;
                    report.processed += 1;
                }
                Err(error) => {
                    report.failed += 1;
                    if self.record_failure(id, &error)? {
                        report.dead_lettered += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    fn remove(&self, id: OperationId) -> Result<()> {
        self.store
            .update_slot(QUEUE_SLOT, |queue: &mut Vec<QueuedOperation>| {
                queue.retain(|operation| operation.id != id);
            })
    }

    /// Note a failed replay; returns whether the operation was dead-lettered.
    fn record_failure(&self, id: OperationId, error: &Error) -> Result<bool> {
        let counts = matches!(error, Error::Remote(remote) if !remote.is_transient());
        let max_attempts = self.max_attempts;

        let exhausted = self
            .store
            .update_slot(QUEUE_SLOT, |queue: &mut Vec<QueuedOperation>| {
                let operation = queue.iter_mut().find(|operation| operation.id == id)?;
                operation.last_error = Some(error.to_string());
                if counts {
                    operation.attempts += 1;
                }
                max_attempts
                    .is_some_and(|max| operation.attempts >= max)
                    .then(|| operation.clone())
            })?;

        let Some(operation) = exhausted else {
            tracing::debug!("Replay of {id} failed, keeping it queued: {error}");
            return Ok(false);
        };

        tracing::warn!(
            "Dropping {} of {}/{} to dead letters after {} failed attempts: {}",
            operation.kind.name(),
            operation.table,
            operation.record_id(),
            operation.attempts,
            error
        );
        self.store
            .update_slot(DEAD_LETTER_SLOT, |dead: &mut Vec<QueuedOperation>| {
                dead.push(operation);
            })?;
        self.remove(id)?;
        Ok(true)
    }

    /// Operations parked after exceeding the retry ceiling
    pub fn dead_letters(&self) -> Vec<QueuedOperation> {
        self.store.read_slot(DEAD_LETTER_SLOT)
    }

    /// Move every dead letter back to the end of the queue with a fresh attempt count.
    pub fn requeue_dead_letters(&self) -> Result<usize> {
        let dead = self.dead_letters();
        let count = dead.len();
        if count == 0 {
            return Ok(0);
        }

        self.store
            .update_slot(QUEUE_SLOT, |queue: &mut Vec<QueuedOperation>| {
                queue.extend(dead.into_iter().map(|mut operation| {
                    operation.attempts = 0;
                    operation.last_error = None;
                    operation
                }));
            })?;
        self.clear_dead_letters()?;
        Ok(count)
    }

    pub fn clear_dead_letters(&self) -> Result<()> {
        self.store
            .write_slot(DEAD_LETTER_SLOT, &Vec::<QueuedOperation>::new())
    }
}

/// Ids of `table` targeted by a queued delete.
pub(crate) fn pending_delete_ids(
    operations: &[QueuedOperation],
    table: TableName,
) -> HashSet<RecordId> {
    operations
        .iter()
        .filter(|operation| operation.table == table)
        .filter(|operation| matches!(operation.kind, OperationKind::Delete { .. }))
        .map(|operation| operation.record_id().clone())
        .collect()
}
