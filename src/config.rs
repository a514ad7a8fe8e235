use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of attempts before an item becomes terminally `Failed`
pub const MAX_RETRIES: u32 = 3;

/// Tunables for both sync workers
///
/// Durations are given in seconds when read from TOML:
///
/// ```toml
/// mutation_interval_secs = 300
/// photo_interval_secs = 30
/// max_retries = 3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Timer period of the mutation coordinator
    pub mutation_interval_secs: u64,
    /// Timer period of the photo upload worker
    pub photo_interval_secs: u64,
    pub max_retries: u32,
    /// Items fetched per mutation cycle
    pub mutation_batch_limit: usize,
    /// Uploads in flight at the same time; a photo cycle fetches twice this
    pub photo_sub_batch_size: usize,
    /// Age after which claimed rows are reset by an init that overlaps a running cycle
    pub stale_grace_secs: u64,
    /// How long `Completed` mutations are kept before purge (0 = next purge)
    pub completed_retention_secs: u64,
    /// How long `Uploaded` photo rows are kept for statistics
    pub uploaded_retention_secs: u64,
    /// Entries kept in each worker's in-memory session log
    pub session_log_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mutation_interval_secs: 5 * 60,
            photo_interval_secs: 30,
            max_retries: MAX_RETRIES,
            mutation_batch_limit: 50,
            photo_sub_batch_size: 5,
            stale_grace_secs: 10 * 60,
            completed_retention_secs: 0,
            uploaded_retention_secs: 7 * 24 * 60 * 60,
            session_log_capacity: 100,
        }
    }
}

impl SyncConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn mutation_interval(&self) -> Duration {
        Duration::from_secs(self.mutation_interval_secs.max(1))
    }

    pub fn photo_interval(&self) -> Duration {
        Duration::from_secs(self.photo_interval_secs.max(1))
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn uploaded_retention(&self) -> Duration {
        Duration::from_secs(self.uploaded_retention_secs)
    }

    /// Upper bound of items fetched per photo cycle
    pub fn photo_fetch_limit(&self) -> usize {
        self.photo_sub_batch_size.max(1) * 2
    }
}
