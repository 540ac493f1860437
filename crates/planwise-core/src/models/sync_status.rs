//! Sync status and statistics

use serde::{Deserialize, Serialize};

/// Derived view of the sync subsystem for connectivity/pending-change indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub queue_length: usize,
    pub sync_in_progress: bool,
    /// Completion time of the last sync pass (Unix ms)
    pub last_sync_timestamp: Option<i64>,
    /// Operations parked after exceeding the retry ceiling
    pub dead_letter_count: usize,
}

/// Persisted counters across sync passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub last_sync_duration_ms: u64,
}

impl SyncStats {
    /// Account for one finished pass
    pub fn record(&mut self, succeeded: bool, duration_ms: u64) {
        self.total_syncs += 1;
        if succeeded {
            self.successful_syncs += 1;
        } else {
            self.failed_syncs += 1;
        }
        self.last_sync_duration_ms = duration_ms;
    }
}
