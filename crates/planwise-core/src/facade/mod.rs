//! Data facade: the create/read/update/delete surface used by clients.
//!
//! Every call tries the remote store first and mirrors the result into the
//! local store. When the remote store is unreachable or refuses the call, the
//! change is applied locally and queued for replay, and the caller gets a
//! [`Served::Local`] carrying the remote failure so it can inform the user.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::error::{Error, RemoteError, Result};
use crate::models::{Filter, OperationKind, QueuedOperation, Record, RecordId, TableName};
use crate::queue::OperationQueue;
use crate::remote::{ChangeCallback, ChangeEvent, ChangeKind, RemoteStore, SubscriptionHandle};
use crate::store::LocalStore;
use crate::sync::Connectivity;
use crate::util::next_updated_at;

/// Where the value handed back by a facade call came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served<T> {
    /// The remote store served the call; the local store mirrors it
    Remote(T),
    /// The remote store failed with `cause`; the value comes from the local
    /// store and `operation` is the queued replay (reads queue nothing)
    Local {
        value: T,
        cause: RemoteError,
        operation: Option<QueuedOperation>,
    },
}

impl<T> Served<T> {
    pub const fn value(&self) -> &T {
        match self {
            Self::Remote(value) | Self::Local { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Remote(value) | Self::Local { value, .. } => value,
        }
    }

    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }

    /// The remote failure that forced the local fallback
    pub const fn cause(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(_) => None,
            Self::Local { cause, .. } => Some(cause),
        }
    }
}

struct Subscription {
    table: TableName,
    callback: ChangeCallback,
    remote: Option<SubscriptionHandle>,
}

pub struct DataFacade {
    store: Arc<LocalStore>,
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Connectivity,
    next_handle: AtomicU64,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
}

impl DataFacade {
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            connectivity,
            next_handle: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Skip the round trip when the platform already reports no connectivity.
    fn ensure_online(&self) -> std::result::Result<(), RemoteError> {
        if self.connectivity.is_online() {
            Ok(())
        } else {
            Err(RemoteError::Offline)
        }
    }

    pub async fn create(
        &self,
        table: TableName,
        data: Map<String, Value>,
    ) -> Result<Served<Record>> {
        let record = Record::new(data);

        let cause = match self.try_create(table, &record).await {
            Ok(stored) => {
                self.store.upsert(table, stored.clone())?;
                return Ok(Served::Remote(stored));
            }
            Err(cause) => cause,
        };

        // A retried create of a record that is already queued reuses that entry.
        let queued = self.queue.pending_for(table).into_iter().find(|operation| {
            matches!(&operation.kind, OperationKind::Create { data } if data.id == record.id)
        });

        let existed = self.store.get(table, &record.id).is_some();
        self.store.upsert(table, record.clone())?;
        let operation = match queued {
            Some(operation) => operation,
            None => self.queue.enqueue(
                table,
                OperationKind::Create {
                    data: record.clone(),
                },
            )?,
        };

        tracing::debug!("Created {table}/{} locally: {cause}", record.id);
        let kind = if existed {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.notify_local(table, kind, &record);
        Ok(Served::Local {
            value: record,
            cause,
            operation: Some(operation),
        })
    }

    async fn try_create(
        &self,
        table: TableName,
        record: &Record,
    ) -> std::result::Result<Record, RemoteError> {
        self.ensure_online()?;
        self.remote.create(table, record.to_payload()).await
    }

    /// Read a table, or the records matching `filter`.
    ///
    /// A successful unfiltered read refreshes the whole local table; a filtered
    /// one refreshes the matching records. Records with queued changes keep
    /// their local version either way.
    pub async fn read(&self, table: TableName, filter: Option<&Filter>) -> Result<Served<Vec<Record>>> {
        let filter = filter.cloned().unwrap_or_default();

        let remote = match self.try_read(table, &filter).await {
            Ok(records) => records,
            Err(cause) => {
                tracing::debug!("Reading {table} from the local store: {cause}");
                return Ok(Served::Local {
                    value: self.store.get_by_filter(table, &filter),
                    cause,
                    operation: None,
                });
            }
        };

        let pending = self.queue.pending_for(table);
        let deleting: HashSet<RecordId> = pending
            .iter()
            .filter(|operation| matches!(operation.kind, OperationKind::Delete { .. }))
            .map(|operation| operation.record_id().clone())
            .collect();
        let changed: HashSet<RecordId> = pending
            .iter()
            .map(|operation| operation.record_id().clone())
            .collect();

        if filter.is_empty() {
            self.store.modify(table, |local| {
                (refresh_table(local, remote, &changed, &deleting), ())
            })?;
        } else {
            self.store.modify(table, |mut local| {
                for record in remote {
                    if changed.contains(&record.id) {
                        continue;
                    }
                    match local.iter_mut().find(|existing| existing.id == record.id) {
                        Some(existing) => *existing = record,
                        None => local.push(record),
                    }
                }
                (local, ())
            })?;
        }

        Ok(Served::Remote(self.store.get_by_filter(table, &filter)))
    }

    async fn try_read(
        &self,
        table: TableName,
        filter: &Filter,
    ) -> std::result::Result<Vec<Record>, RemoteError> {
        self.ensure_online()?;
        self.remote.read(table, filter).await
    }

    /// Apply partial updates to a record.
    ///
    /// Every update carries a fresh `updated_at`, later than the cached copy's.
    /// Falls back to the cached record; with no cached copy the update cannot
    /// be applied anywhere and fails with [`Error::NotFound`].
    pub async fn update(
        &self,
        table: TableName,
        id: &RecordId,
        updates: Map<String, Value>,
    ) -> Result<Served<Record>> {
        let previous = self.store.get(table, id).map_or(0, |record| record.updated_at);
        let mut updates = updates;
        updates.insert("updated_at".into(), Value::from(next_updated_at(previous)));

        let cause = match self.try_update(table, id, updates.clone()).await {
            Ok(stored) => {
                self.store.upsert(table, stored.clone())?;
                return Ok(Served::Remote(stored));
            }
            Err(cause) => cause,
        };

        let mut record = self
            .store
            .get(table, id)
            .ok_or_else(|| Error::NotFound(format!("{table}/{id}")))?;
        let stamped = updates.get("updated_at").and_then(Value::as_i64).unwrap_or(0);
        let updated_at = stamped.max(next_updated_at(record.updated_at));
        updates.insert("updated_at".into(), Value::from(updated_at));
        record.apply_updates(&updates, updated_at);
        self.store.upsert(table, record.clone())?;

        let operation = self.queue.enqueue(
            table,
            OperationKind::Update {
                record_id: id.clone(),
                updates,
            },
        )?;

        tracing::debug!("Updated {table}/{id} locally: {cause}");
        self.notify_local(table, ChangeKind::Update, &record);
        Ok(Served::Local {
            value: record,
            cause,
            operation: Some(operation),
        })
    }

    async fn try_update(
        &self,
        table: TableName,
        id: &RecordId,
        updates: Map<String, Value>,
    ) -> std::result::Result<Record, RemoteError> {
        self.ensure_online()?;
        self.remote.update(table, id, updates).await
    }

    pub async fn delete(&self, table: TableName, id: &RecordId) -> Result<Served<()>> {
        let cause = match self.try_delete(table, id).await {
            Ok(()) => {
                self.store.delete(table, id)?;
                return Ok(Served::Remote(()));
            }
            // Already gone remotely; only a queued create can still bring it back.
            Err(RemoteError::NotFound(_)) if !self.queue.has_pending(table, id) => {
                self.store.delete(table, id)?;
                return Ok(Served::Remote(()));
            }
            Err(cause) => cause,
        };

        // Queued before the local removal so a concurrent merge never sees
        // the record gone locally without a pending delete.
        let operation = self.queue.enqueue(
            table,
            OperationKind::Delete {
                record_id: id.clone(),
            },
        )?;
        let removed = self.store.get(table, id);
        self.store.delete(table, id)?;

        tracing::debug!("Deleted {table}/{id} locally: {cause}");
        if let Some(record) = removed {
            self.notify_local(table, ChangeKind::Delete, &record);
        }
        Ok(Served::Local {
            value: (),
            cause,
            operation: Some(operation),
        })
    }

    async fn try_delete(&self, table: TableName, id: &RecordId) -> std::result::Result<(), RemoteError> {
        self.ensure_online()?;
        self.remote.delete(table, id).await
    }

    /// Deliver changes of `table` to `callback`.
    ///
    /// Remote changes arrive through the remote store's subscription when it
    /// can be established; changes applied locally during an outage are always
    /// delivered.
    pub async fn subscribe(&self, table: TableName, callback: ChangeCallback) -> SubscriptionHandle {
        let remote = match self.remote.subscribe(table, callback.clone()).await {
            Ok(handle) => Some(handle),
            Err(error) => {
                tracing::debug!("Remote subscription to {table} unavailable: {error}");
                None
            }
        };

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.lock_subscriptions().insert(
            id,
            Subscription {
                table,
                callback,
                remote,
            },
        );
        SubscriptionHandle::new(id)
    }

    /// Open the remote side of subscriptions created while the remote store
    /// was unreachable. Returns how many were established.
    pub async fn restore_remote_subscriptions(&self) -> usize {
        let missing: Vec<(u64, TableName, ChangeCallback)> = self
            .lock_subscriptions()
            .iter()
            .filter(|(_, subscription)| subscription.remote.is_none())
            .map(|(id, subscription)| (*id, subscription.table, subscription.callback.clone()))
            .collect();

        let mut restored = 0;
        for (id, table, callback) in missing {
            let handle = match self.remote.subscribe(table, callback).await {
                Ok(handle) => handle,
                Err(error) => {
                    tracing::debug!("Remote subscription to {table} still unavailable: {error}");
                    continue;
                }
            };

            let unclaimed = match self.lock_subscriptions().get_mut(&id) {
                Some(subscription) if subscription.remote.is_none() => {
                    subscription.remote = Some(handle);
                    restored += 1;
                    None
                }
                _ => Some(handle),
            };
            // Released or restored concurrently
            if let Some(handle) = unclaimed {
                if let Err(error) = self.remote.unsubscribe(handle).await {
                    tracing::debug!("Failed to release remote subscription: {error}");
                }
            }
        }
        if restored > 0 {
            tracing::debug!("Restored {restored} remote subscriptions");
        }
        restored
    }

    /// Release a subscription; unknown handles are ignored.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let removed = self.lock_subscriptions().remove(&handle.id());
        if let Some(remote) = removed.and_then(|subscription| subscription.remote) {
            self.remote.unsubscribe(remote).await?;
        }
        Ok(())
    }

    /// Release every subscription.
    pub async fn unsubscribe_all(&self) {
        let subscriptions: Vec<Subscription> = self
            .lock_subscriptions()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();
        for remote in subscriptions.into_iter().filter_map(|subscription| subscription.remote) {
            if let Err(error) = self.remote.unsubscribe(remote).await {
                tracing::debug!("Failed to release remote subscription: {error}");
            }
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.lock_subscriptions().len()
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_local(&self, table: TableName, kind: ChangeKind, record: &Record) {
        let callbacks: Vec<ChangeCallback> = self
            .lock_subscriptions()
            .values()
            .filter(|subscription| subscription.table == table)
            .map(|subscription| subscription.callback.clone())
            .collect();
        for callback in callbacks {
            callback(ChangeEvent {
                table,
                kind,
                record: record.clone(),
            });
        }
    }
}

/// New contents of a table after a full remote read.
///
/// Remote records replace the cache, except that records with queued changes
/// keep their local version, records with a queued delete stay deleted, and
/// local records still waiting for their queued create are kept.
fn refresh_table(
    local: Vec<Record>,
    remote: Vec<Record>,
    changed: &HashSet<RecordId>,
    deleting: &HashSet<RecordId>,
) -> Vec<Record> {
    let mut local_changes: HashMap<RecordId, Record> = local
        .iter()
        .filter(|record| changed.contains(&record.id))
        .map(|record| (record.id.clone(), record.clone()))
        .collect();

    let mut refreshed = Vec::with_capacity(remote.len());
    for record in remote {
        if deleting.contains(&record.id) {
            continue;
        }
        refreshed.push(local_changes.remove(&record.id).unwrap_or(record));
    }
    refreshed.extend(
        local
            .into_iter()
            .filter(|record| local_changes.contains_key(&record.id)),
    );
    refreshed
}
