//! In-process remote store.
//!
//! Behaves like the hosted backend for tests and offline demos, with knobs to
//! simulate outages, scripted failures, server-assigned ids and latency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ChangeCallback, ChangeEvent, ChangeKind, RemoteResult, RemoteStore, SubscriptionHandle};
use crate::error::RemoteError;
use crate::models::{Filter, Record, RecordId, TableName};
use crate::util::{next_updated_at, now_millis};

/// Number of calls served per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub read: usize,
    pub update: usize,
    pub delete: usize,
}

struct MemoryState {
    tables: HashMap<TableName, Vec<Record>>,
    available: bool,
    scripted_failures: VecDeque<RemoteError>,
    assign_ids: bool,
    next_id: u64,
    latency: Option<Duration>,
    calls: CallCounts,
    next_handle: u64,
    subscribers: Vec<(SubscriptionHandle, TableName, ChangeCallback)>,
}

/// Remote store backed by process memory
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                tables: HashMap::new(),
                available: true,
                scripted_failures: VecDeque::new(),
                assign_ids: false,
                next_id: 1,
                latency: None,
                calls: CallCounts::default(),
                next_handle: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Replace client-supplied ids on create with `srv-<n>`
    #[must_use]
    pub fn with_server_ids(self) -> Self {
        self.lock().assign_ids = true;
        self
    }

    /// Delay every call, so concurrent callers observe each other in flight
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = Some(latency);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing or regaining the connection
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Fail the next call with `error`; scripted failures are consumed in order
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Store records directly, without notifications
    pub fn seed(&self, table: TableName, records: impl IntoIterator<Item = Record>) {
        let mut state = self.lock();
        let rows = state.tables.entry(table).or_default();
        for record in records {
            rows.retain(|row| row.id != record.id);
            rows.push(record);
        }
    }

    /// Current remote contents of a table
    pub fn records(&self, table: TableName) -> Vec<Record> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Count the call, apply latency and scripted failures.
    async fn admit(&self, count: impl FnOnce(&mut CallCounts)) -> RemoteResult<()> {
        let latency = {
            let mut state = self.lock();
            count(&mut state.calls);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if !state.available {
            return Err(RemoteError::Network("connection refused".to_string()));
        }
        state.scripted_failures.pop_front().map_or(Ok(()), Err)
    }

    fn notify(&self, table: TableName, kind: ChangeKind, record: &Record) {
        let callbacks: Vec<ChangeCallback> = self
            .lock()
            .subscribers
            .iter()
            .filter(|(_, subscribed, _)| *subscribed == table)
            .map(|(_, _, callback)| callback.clone())
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

fn timestamp_field(data: &Map<String, Value>, field: &str) -> Option<i64> {
    data.get(field).and_then(Value::as_i64).filter(|value| *value > 0)
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(&self, table: TableName, data: Map<String, Value>) -> RemoteResult<Record> {
        self.admit(|calls| calls.create += 1).await?;

        let created_at = timestamp_field(&data, "created_at");
        let updated_at = timestamp_field(&data, "updated_at");
        let mut record = Record::new(data);
        let now = now_millis();
        record.created_at = created_at.unwrap_or(now);
        record.updated_at = updated_at.unwrap_or(now);

        {
            let mut state = self.lock();
            if state.assign_ids {
                record.id = RecordId::from(format!("srv-{}", state.next_id));
                state.next_id += 1;
            }
            let rows = state.tables.entry(table).or_default();
            if rows.iter().any(|row| row.id == record.id) {
                return Err(RemoteError::Rejected(format!(
                    "duplicate key value violates unique constraint on {table}.id ({})",
                    record.id
                )));
            }
            rows.push(record.clone());
        }

        self.notify(table, ChangeKind::Insert, &record);
        Ok(record)
    }

    async fn read(&self, table: TableName, filter: &Filter) -> RemoteResult<Vec<Record>> {
        self.admit(|calls| calls.read += 1).await?;

        Ok(self
            .records(table)
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect())
    }

    async fn update(
        &self,
        table: TableName,
        id: &RecordId,
        updates: Map<String, Value>,
    ) -> RemoteResult<Record> {
        self.admit(|calls| calls.update += 1).await?;

        let updated = {
            let mut state = self.lock();
            let record = state
                .tables
                .get_mut(&table)
                .and_then(|rows| rows.iter_mut().find(|row| &row.id == id))
                .ok_or_else(|| RemoteError::NotFound(format!("{table}/{id}")))?;
            let stamp = timestamp_field(&updates, "updated_at")
                .unwrap_or_else(|| next_updated_at(record.updated_at));
            record.apply_updates(&updates, stamp);
            record.clone()
        };

        self.notify(table, ChangeKind::Update, &updated);
        Ok(updated)
    }

    async fn delete(&self, table: TableName, id: &RecordId) -> RemoteResult<()> {
        self.admit(|calls| calls.delete += 1).await?;

        let removed = {
            let mut state = self.lock();
            let rows = state.tables.entry(table).or_default();
            let position = rows
                .iter()
                .position(|row| &row.id == id)
                .ok_or_else(|| RemoteError::NotFound(format!("{table}/{id}")))?;
            rows.remove(position)
        };

        self.notify(table, ChangeKind::Delete, &removed);
        Ok(())
    }

    async fn subscribe(
        &self,
        table: TableName,
        on_change: ChangeCallback,
    ) -> RemoteResult<SubscriptionHandle> {
        let mut state = self.lock();
        if !state.available {
            return Err(RemoteError::Network("connection refused".to_string()));
        }
        let handle = SubscriptionHandle::new(state.next_handle);
        state.next_handle += 1;
        state.subscribers.push((handle, table, on_change));
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> RemoteResult<()> {
        self.lock()
            .subscribers
            .retain(|(subscribed, _, _)| *subscribed != handle);
        Ok(())
    }
}
