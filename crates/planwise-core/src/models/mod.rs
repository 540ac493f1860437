//! Data models for Planwise

mod operation;
mod record;
mod sync_conflict;
mod sync_status;
mod table;

pub use operation::{OperationId, OperationKind, QueuedOperation};
pub use record::{Filter, Record, RecordId};
pub use sync_conflict::{Conflict, Resolution, Resolutions, SyncConflict};
pub use sync_status::{SyncStats, SyncStatus};
pub use table::TableName;
