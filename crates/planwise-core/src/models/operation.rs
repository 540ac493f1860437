//! Queued operation model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::record::{Record, RecordId};
use super::table::TableName;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The mutation a queued operation will replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationKind {
    Create {
        data: Record,
    },
    Update {
        record_id: RecordId,
        updates: Map<String, Value>,
    },
    Delete {
        record_id: RecordId,
    },
}

impl OperationKind {
    /// The record this mutation targets
    pub const fn record_id(&self) -> &RecordId {
        match self {
            Self::Create { data } => &data.id,
            Self::Update { record_id, .. } | Self::Delete { record_id } => record_id,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// A mutation that could not reach the remote store and waits for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier
    pub id: OperationId,
    /// Enqueue timestamp (Unix ms)
    pub timestamp: i64,
    /// Target table
    pub table: TableName,
    /// Mutation to replay
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Failed replays that count toward the retry ceiling
    #[serde(default)]
    pub attempts: u32,
    /// Message of the most recent replay failure
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Wrap a mutation with a fresh id and timestamp
    #[must_use]
    pub fn new(table: TableName, kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            timestamp: crate::util::now_millis(),
            table,
            kind,
            attempts: 0,
            last_error: None,
        }
    }

    pub const fn record_id(&self) -> &RecordId {
        self.kind.record_id()
    }
}
