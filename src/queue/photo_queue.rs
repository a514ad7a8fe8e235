//! Durable queue of captured photo binaries awaiting object storage.

use crate::database::{now_ms, Database};
use crate::error::{SyncError, SyncResult};
use crate::models::{NewPhotoUpload, PhotoUploadItem, PhotoUploadStats, UploadStatus};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

const COLUMNS: &str = "id, photo_id, batch_id, local_path, upload_status, attempts, \
                       last_attempt_at, error_message, retryable, created_at";

/// Inserts an upload request as `Pending` and returns its id
pub fn insert_photo_upload(conn: &Connection, upload: &NewPhotoUpload) -> SyncResult<String> {
    let id = ulid::Ulid::new().to_string();

    conn.execute(
        "INSERT INTO photo_upload_queue (id, photo_id, batch_id, local_path, upload_status, attempts, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            id,
            upload.photo_id,
            upload.batch_id,
            upload.local_path,
            UploadStatus::Pending,
            now_ms(),
        ],
    )?;

    log::debug!("Enqueued upload of photo {} as {}", upload.photo_id, id);
    Ok(id)
}

#[derive(Clone)]
pub struct PhotoUploadQueue {
    db: Database,
}

impl PhotoUploadQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn enqueue(&self, upload: &NewPhotoUpload) -> SyncResult<String> {
        self.db.with_conn(|conn| insert_photo_upload(conn, upload))
    }

    pub fn get(&self, id: &str) -> SyncResult<Option<PhotoUploadItem>> {
        self.db.with_conn(|conn| {
            let sql = format!("SELECT {} FROM photo_upload_queue WHERE id = ?1", COLUMNS);
            Ok(conn
                .query_row(&sql, [id], |row| PhotoUploadItem::try_from(row))
                .optional()?)
        })
    }

    /// `Pending`/`Failed` items with attempts left, oldest first
    pub fn list_eligible(&self, max_attempts: u32, limit: usize) -> SyncResult<Vec<PhotoUploadItem>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM photo_upload_queue
                 WHERE upload_status IN (?1, ?2) AND attempts < ?3 AND retryable = 1
                 ORDER BY created_at ASC, seq ASC
                 LIMIT ?4",
                COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(
                    params![
                        UploadStatus::Pending,
                        UploadStatus::Failed,
                        max_attempts,
                        limit as i64
                    ],
                    |row| PhotoUploadItem::try_from(row),
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
    }

    pub fn mark_uploading(&self, id: &str) -> SyncResult<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE photo_upload_queue SET upload_status = ?1, last_attempt_at = ?2 WHERE id = ?3",
                params![UploadStatus::Uploading, now_ms(), id],
            )?;
            ensure_changed(changed, id)
        })
    }

    /// Records an attempt outcome: sets status, bumps attempts, stamps last attempt
    ///
    /// The error message is replaced, so a success clears the last failure.
    pub fn update_status(&self, id: &str, status: UploadStatus, error: Option<&str>) -> SyncResult<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE photo_upload_queue
                 SET upload_status = ?1, attempts = attempts + 1, last_attempt_at = ?2,
                     error_message = ?3
                 WHERE id = ?4",
                params![status, now_ms(), error, id],
            )?;
            ensure_changed(changed, id)
        })
    }

    /// Records a failed attempt and returns the resulting status
    ///
    /// The item goes back to `Pending` while attempts remain, otherwise (or when
    /// the failure is not retryable) it becomes terminally `Failed`.
    pub fn record_failure(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
        retryable: bool,
    ) -> SyncResult<UploadStatus> {
        self.db.with_conn(|conn| {
            let status = conn
                .query_row(
                    "UPDATE photo_upload_queue
                     SET attempts = attempts + 1,
                         last_attempt_at = ?1,
                         error_message = ?2,
                         retryable = ?3,
                         upload_status = CASE
                             WHEN ?3 = 0 OR attempts + 1 >= ?4 THEN ?5
                             ELSE ?6
                         END
                     WHERE id = ?7
                     RETURNING upload_status",
                    params![
                        now_ms(),
                        error,
                        retryable,
                        max_attempts,
                        UploadStatus::Failed,
                        UploadStatus::Pending,
                        id
                    ],
                    |row| row.get::<_, UploadStatus>(0),
                )
                .optional()?;
            status.ok_or_else(|| SyncError::NotFound(format!("upload item {}", id)))
        })
    }

    /// Deletes every item in `status`; only `Uploaded` may be discarded
    pub fn purge(&self, status: UploadStatus) -> SyncResult<usize> {
        self.purge_older_than(status, i64::MAX)
    }

    pub fn purge_older_than(&self, status: UploadStatus, cutoff_ms: i64) -> SyncResult<usize> {
        if status != UploadStatus::Uploaded {
            return Err(SyncError::InvalidValue(format!(
                "refusing to purge uploads in status '{}'",
                status.as_str()
            )));
        }

        self.db.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM photo_upload_queue
                 WHERE upload_status = ?1 AND COALESCE(last_attempt_at, created_at) < ?2",
                params![status, cutoff_ms],
            )?;
            Ok(deleted)
        })
    }

    pub fn counts_by_status(&self) -> SyncResult<HashMap<UploadStatus, usize>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT upload_status, COUNT(*) FROM photo_upload_queue GROUP BY upload_status",
            )?;
            let counts = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, UploadStatus>(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok(counts)
        })
    }

    /// Read-only projection for debug screens
    pub fn stats(&self) -> SyncResult<PhotoUploadStats> {
        let counts = self.counts_by_status()?;
        let count = |status| counts.get(&status).copied().unwrap_or(0);
        Ok(PhotoUploadStats {
            pending: count(UploadStatus::Pending),
            uploading: count(UploadStatus::Uploading),
            uploaded: count(UploadStatus::Uploaded),
            failed: count(UploadStatus::Failed),
        })
    }

    /// Returns `Uploading` items claimed before `cutoff_ms` to `Pending`
    pub fn recover_stale(&self, cutoff_ms: i64) -> SyncResult<usize> {
        self.db.with_conn(|conn| {
            let reset = conn.execute(
                "UPDATE photo_upload_queue SET upload_status = ?1
                 WHERE upload_status = ?2 AND COALESCE(last_attempt_at, created_at) < ?3",
                params![UploadStatus::Pending, UploadStatus::Uploading, cutoff_ms],
            )?;
            Ok(reset)
        })
    }

    /// Manual retry: every `Failed` upload gets a fresh set of attempts
    pub fn retry_all_failed(&self) -> SyncResult<usize> {
        self.db.with_conn(|conn| {
            let reset = conn.execute(
                "UPDATE photo_upload_queue
                 SET upload_status = ?1, attempts = 0, error_message = NULL, retryable = 1
                 WHERE upload_status = ?2",
                params![UploadStatus::Pending, UploadStatus::Failed],
            )?;
            Ok(reset)
        })
    }
}

fn ensure_changed(changed: usize, id: &str) -> SyncResult<()> {
    if changed == 0 {
        Err(SyncError::NotFound(format!("upload item {}", id)))
    } else {
        Ok(())
    }
}
