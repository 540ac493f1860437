//! Remote store contract and adapters.
//!
//! The sync core only talks to the hosted backend through [`RemoteStore`].
//! Authentication and session handling live outside the core; an adapter
//! without a valid session reports [`RemoteError::Unauthenticated`], which the
//! facade treats like any other unavailability and queues.

mod memory;
mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::models::{Filter, Record, RecordId, TableName};

pub use memory::{CallCounts, MemoryRemoteStore};
pub use rest::RestRemoteStore;

/// Result type for remote store calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Kind of change delivered by a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification for one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub table: TableName,
    pub kind: ChangeKind,
    pub record: Record,
}

/// Subscriber callback
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Identifies a live subscription so it can be released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Table CRUD plus change notifications on the hosted backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a record; returns the stored version (the server may assign the id)
    async fn create(&self, table: TableName, data: Map<String, Value>) -> RemoteResult<Record>;

    /// Records matching an exact-match filter
    async fn read(&self, table: TableName, filter: &Filter) -> RemoteResult<Vec<Record>>;

    /// Apply partial updates; returns the stored version
    async fn update(
        &self,
        table: TableName,
        id: &RecordId,
        updates: Map<String, Value>,
    ) -> RemoteResult<Record>;

    async fn delete(&self, table: TableName, id: &RecordId) -> RemoteResult<()>;

    /// Start delivering changes of `table` to `on_change`
    async fn subscribe(
        &self,
        table: TableName,
        on_change: ChangeCallback,
    ) -> RemoteResult<SubscriptionHandle>;

    /// Release a subscription; unknown handles are ignored
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> RemoteResult<()>;
}

/// Remote store used when no backend is configured: every call reports offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisconnectedRemoteStore;

#[async_trait]
impl RemoteStore for DisconnectedRemoteStore {
    async fn create(&self, _table: TableName, _data: Map<String, Value>) -> RemoteResult<Record> {
        Err(RemoteError::Offline)
    }

    async fn read(&self, _table: TableName, _filter: &Filter) -> RemoteResult<Vec<Record>> {
        Err(RemoteError::Offline)
    }

    async fn update(
        &self,
        _table: TableName,
        _id: &RecordId,
        _updates: Map<String, Value>,
    ) -> RemoteResult<Record> {
        Err(RemoteError::Offline)
    }

    async fn delete(&self, _table: TableName, _id: &RecordId) -> RemoteResult<()> {
        Err(RemoteError::Offline)
    }

    async fn subscribe(
        &self,
        _table: TableName,
        _on_change: ChangeCallback,
    ) -> RemoteResult<SubscriptionHandle> {
        Err(RemoteError::Offline)
    }

    async fn unsubscribe(&self, _handle: SubscriptionHandle) -> RemoteResult<()> {
        Ok(())
    }
}
