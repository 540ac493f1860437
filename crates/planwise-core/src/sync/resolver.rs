//! Last-write-wins reconciliation of one table.

use std::collections::{HashMap, HashSet};

use crate::models::{Conflict, Record, RecordId, Resolution, Resolutions, TableName};
use crate::util::next_updated_at;

/// A tie that was settled by an explicit resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConflict {
    pub conflict: Conflict,
    pub resolution: Resolution,
}

/// Result of merging the local and remote versions of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// The table contents to store locally
    pub merged: Vec<Record>,
    /// Ties with no answer; the local copy was left untouched
    pub conflicts: Vec<Conflict>,
    /// Ties settled by `resolutions`
    pub resolved: Vec<ResolvedConflict>,
    /// Records whose local winner must be written back to the remote store
    pub push: Vec<Record>,
    /// Remote versions adopted (newer or remote-only)
    pub pulled: usize,
    /// Local versions kept over an older remote copy, or with no remote copy
    pub kept_local: usize,
}

/// Merge `local` and `remote` by `updated_at`.
///
/// Local order is preserved; remote-only records are appended in remote order
/// unless a delete for them is still queued. A tie with differing content is
/// a conflict unless `resolutions` answers it.
pub fn reconcile(
    table: TableName,
    local: Vec<Record>,
    remote: Vec<Record>,
    pending_deletes: &HashSet<RecordId>,
    resolutions: &Resolutions,
) -> Reconciliation {
    let mut remote_order = Vec::with_capacity(remote.len());
    let mut remote_by_id: HashMap<RecordId, Record> = HashMap::with_capacity(remote.len());
    for record in remote {
        remote_order.push(record.id.clone());
        remote_by_id.insert(record.id.clone(), record);
    }

    let mut outcome = Reconciliation::default();
    for local_record in local {
        let Some(remote_record) = remote_by_id.remove(&local_record.id) else {
            outcome.kept_local += 1;
            outcome.merged.push(local_record);
            continue;
        };

        if remote_record.updated_at > local_record.updated_at {
            outcome.pulled += 1;
            outcome.merged.push(remote_record);
        } else if local_record.updated_at > remote_record.updated_at
            || local_record.same_content(&remote_record)
        {
            outcome.kept_local += 1;
            outcome.merged.push(local_record);
        } else {
            let resolution = resolutions.get(&local_record.id).copied();
            outcome.settle(
                Conflict {
                    id: local_record.id.clone(),
                    table,
                    local: local_record,
                    remote: remote_record,
                },
                resolution,
            );
        }
    }

    for id in remote_order {
        if pending_deletes.contains(&id) {
            continue;
        }
        if let Some(record) = remote_by_id.remove(&id) {
            outcome.pulled += 1;
            outcome.merged.push(record);
        }
    }

    outcome
}

impl Reconciliation {
    fn settle(&mut self, conflict: Conflict, resolution: Option<Resolution>) {
        match resolution {
            None => {
                self.merged.push(conflict.local.clone());
                self.conflicts.push(conflict);
            }
            Some(Resolution::Remote) => {
                self.merged.push(conflict.remote.clone());
                self.resolved.push(ResolvedConflict {
                    conflict,
                    resolution: Resolution::Remote,
                });
            }
            Some(Resolution::Local) => {
                // The kept copy must outrank both sides on the next comparison.
                let mut winner = conflict.local.clone();
                winner.updated_at =
                    next_updated_at(conflict.local.updated_at.max(conflict.remote.updated_at));
                self.merged.push(winner.clone());
                self.push.push(winner);
                self.resolved.push(ResolvedConflict {
                    conflict,
                    resolution: Resolution::Local,
                });
            }
        }
    }
}
