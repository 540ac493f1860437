//! Sync conflict models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::record::{Record, RecordId};
use super::table::TableName;

/// Both sides modified a record with no unambiguous winner.
///
/// Produced during reconciliation and never persisted as pending state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Conflict identifier (the id of the record in dispute)
    pub id: RecordId,
    pub table: TableName,
    pub local: Record,
    pub remote: Record,
}

/// Which version of a conflicting record survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Remote,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Answers keyed by conflict id. An empty map cancels resolution for the round.
pub type Resolutions = HashMap<RecordId, Resolution>;

/// Recorded sync conflict and how it was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Table of the record
    pub table: TableName,
    /// Record involved in the conflict
    pub record_id: String,
    /// Local version's timestamp
    pub local_updated_at: i64,
    /// Remote version's timestamp
    pub remote_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
