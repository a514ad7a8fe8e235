//! Durable queue of batch/photo record changes awaiting CRM/ERP sync.
//!
//! Pure CRUD over the `mutation_queue` table; state transitions are driven by
//! the mutation sync coordinator.

use crate::database::{now_ms, Database};
use crate::error::{SyncError, SyncResult};
use crate::models::{MutationQueueItem, MutationStatus, NewMutation, QueueStats};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

const COLUMNS: &str = "id, resource_type, object_id, operation, payload, attempts, \
                       last_attempt_at, status, error, retryable, created_at";

/// Inserts a mutation as `Pending` with zero attempts and returns its id
///
/// Takes a plain connection so callers can enqueue inside their own transaction.
pub fn insert_mutation(conn: &Connection, mutation: &NewMutation) -> SyncResult<String> {
    let id = ulid::Ulid::new().to_string();
    let payload = serde_json::to_string(&mutation.payload)?;

    conn.execute(
        "INSERT INTO mutation_queue (id, resource_type, object_id, operation, payload, attempts, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        params![
            id,
            mutation.resource_type,
            mutation.object_id,
            mutation.operation,
            payload,
            MutationStatus::Pending,
            now_ms(),
        ],
    )?;

    log::debug!(
        "Enqueued {} {} {} as {}",
        mutation.operation.as_str(),
        mutation.resource_type.as_str(),
        mutation.object_id,
        id
    );
    Ok(id)
}

#[derive(Clone)]
pub struct MutationQueue {
    db: Database,
}

impl MutationQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Does not deduplicate: enqueuing the same change twice yields two rows
    pub fn enqueue(&self, mutation: &NewMutation) -> SyncResult<String> {
        self.db.with_conn(|conn| insert_mutation(conn, mutation))
    }

    pub fn get(&self, id: &str) -> SyncResult<Option<MutationQueueItem>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM mutation_queue WHERE id = ?1", COLUMNS);
            Ok(conn
                .query_row(&sql, [id], |row| MutationQueueItem::try_from(row))
                .optional()?)
        })
    }

    /// `Pending`/`Failed` items with attempts left, oldest first
    pub fn list_eligible(&self, max_attempts: u32, limit: usize) -> SyncResult<Vec<MutationQueueItem>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM mutation_queue
                 WHERE status IN (?1, ?2) AND attempts < ?3 AND retryable = 1
                 ORDER BY created_at ASC, seq ASC
                 LIMIT ?4",
                COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(
                    params![
                        MutationStatus::Pending,
                        MutationStatus::Failed,
                        max_attempts,
                        limit as i64
                    ],
                    |row| MutationQueueItem::try_from(row),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }

    /// Claims an item for processing; the attempt is counted when its outcome is recorded
    pub fn mark_in_progress(&self, id: &str) -> SyncResult<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE mutation_queue SET status = ?1, last_attempt_at = ?2 WHERE id = ?3",
                params![MutationStatus::InProgress, now_ms(), id],
            )?;
            ensure_changed(changed, id)
        })
    }

    /// Records an attempt outcome: sets status, bumps attempts, stamps last attempt
    pub fn update_status(&self, id: &str, status: MutationStatus, error: Option<&str>) -> SyncResult<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE mutation_queue
                 SET status = ?1, attempts = attempts + 1, last_attempt_at = ?2, error = ?3
                 WHERE id = ?4",
                params![status, now_ms(), error, id],
            )?;
            ensure_changed(changed, id)
        })
    }

    /// Failed attempt that no retry can fix; never auto-selected again
    pub fn mark_permanently_failed(&self, id: &str, error: &str) -> SyncResult<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE mutation_queue
                 SET status = ?1, attempts = attempts + 1, last_attempt_at = ?2, error = ?3, retryable = 0
                 WHERE id = ?4",
                params![MutationStatus::Failed, now_ms(), error, id],
            )?;
            ensure_changed(changed, id)
        })
    }

    /// Deletes every item in `status`; only `Completed` may be discarded
    pub fn purge(&self, status: MutationStatus) -> SyncResult<usize> {
        self.purge_older_than(status, i64::MAX)
    }

    /// Deletes items in `status` whose last attempt is older than `cutoff_ms`
    pub fn purge_older_than(&self, status: MutationStatus, cutoff_ms: i64) -> SyncResult<usize> {
        if status != MutationStatus::Completed {
            return Err(SyncError::InvalidValue(format!(
                "refusing to purge mutations in status '{}'",
                status.as_str()
            )));
        }

        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM mutation_queue WHERE status = ?1 AND COALESCE(last_attempt_at, created_at) < ?2",
                params![status, cutoff_ms],
            )?;
            Ok(deleted)
        })
    }

    pub fn counts_by_status(&self) -> SyncResult<HashMap<MutationStatus, usize>> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM mutation_queue GROUP BY status")?;
            let counts = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, MutationStatus>(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok(counts)
        })
    }

    pub fn stats(&self) -> SyncResult<QueueStats> {
        let counts = self.counts_by_status()?;
        let count = |status| counts.get(&status).copied().unwrap_or(0);
        Ok(QueueStats {
            pending: count(MutationStatus::Pending),
            in_progress: count(MutationStatus::InProgress),
            completed: count(MutationStatus::Completed),
            failed: count(MutationStatus::Failed),
        })
    }

    /// Returns `InProgress` items claimed before `cutoff_ms` to `Pending`
    ///
    /// Such rows are left behind when the process dies mid-cycle.
    pub fn recover_stale(&self, cutoff_ms: i64) -> SyncResult<usize> {
        self.db.with_conn(|conn| {
            let reset = conn.execute(
                "UPDATE mutation_queue SET status = ?1
                 WHERE status = ?2 AND COALESCE(last_attempt_at, created_at) < ?3",
                params![MutationStatus::Pending, MutationStatus::InProgress, cutoff_ms],
            )?;
            Ok(reset)
        })
    }

    /// Manual retry: every `Failed` item gets a fresh set of attempts
    pub fn retry_all_failed(&self) -> SyncResult<usize> {
        self.db.with_conn(|conn| {
            let reset = conn.execute(
                "UPDATE mutation_queue SET status = ?1, attempts = 0, error = NULL, retryable = 1
                 WHERE status = ?2",
                params![MutationStatus::Pending, MutationStatus::Failed],
            )?;
            Ok(reset)
        })
    }
}

fn ensure_changed(changed: usize, id: &str) -> SyncResult<()> {
    if changed == 0 {
        Err(SyncError::NotFound(format!("queue item {}", id)))
    } else {
        Ok(())
    }
}
