use crate::database::now_ms;
use serde::{Deserialize, Serialize};

/// Mutation queue rows per status
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

/// Photo upload queue rows per status, for debug screens
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoUploadStats {
    pub pending: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub failed: usize,
}

/// Why a cycle did not process anything
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another cycle of the same worker was running
    AlreadyRunning,
    /// The worker has not been started
    NotStarted,
}

/// Outcome of one worker cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    /// Epoch milliseconds
    pub started_at: i64,
    pub fetched: usize,
    pub succeeded: usize,
    /// Failed attempts that stay eligible for a later cycle
    pub retried: usize,
    /// Failed attempts that made the item terminally `Failed`
    pub exhausted: usize,
    pub purged: usize,
    pub skipped: Option<SkipReason>,
}

impl CycleReport {
    pub(crate) fn started() -> Self {
        Self {
            started_at: now_ms(),
            ..Default::default()
        }
    }

    pub(crate) fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::started()
        }
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// Combined view over both queues
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStats {
    pub mutations: QueueStats,
    pub photos: PhotoUploadStats,
}
