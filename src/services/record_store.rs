//! Local batch/photo records and the record store used by the upload worker.

use crate::database::Database;
use crate::error::{SyncError, SyncResult};
use crate::models::{Batch, PhotoRecord, UploadTarget};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

/// Domain record access needed by the photo upload worker
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Company/reference of the batch owning the photo, `None` if the record is gone
    async fn upload_target(&self, photo_id: &str, batch_id: &str) -> SyncResult<Option<UploadTarget>>;

    /// Stores the remote URL; `false` if the photo record no longer exists
    async fn set_photo_url(&self, photo_id: &str, url: &str) -> SyncResult<bool>;
}

/// Record store over the local `batches`/`photos` tables
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upload_target(&self, photo_id: &str, batch_id: &str) -> SyncResult<Option<UploadTarget>> {
        self.db.with_conn(|conn| {
            let target = conn
                .query_row(
                    "SELECT b.company_id, b.reference_id
                     FROM photos p
                     JOIN batches b ON b.id = p.batch_id
                     WHERE p.id = ?1 AND p.batch_id = ?2 AND p.deleted = 0 AND b.deleted = 0",
                    params![photo_id, batch_id],
                    |row| {
                        Ok(UploadTarget {
                            company_id: row.get(0)?,
                            reference_id: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(target)
        })
    }

    async fn set_photo_url(&self, photo_id: &str, url: &str) -> SyncResult<bool> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE photos SET remote_url = ?1 WHERE id = ?2 AND deleted = 0",
                params![url, photo_id],
            )?;
            Ok(changed > 0)
        })
    }
}

pub fn insert_batch(conn: &Connection, batch: &Batch) -> SyncResult<()> {
    conn.execute(
        "INSERT INTO batches (id, company_id, reference_id, title) VALUES (?1, ?2, ?3, ?4)",
        params![batch.id, batch.company_id, batch.reference_id, batch.title],
    )?;
    Ok(())
}

pub fn update_batch(conn: &Connection, batch: &Batch) -> SyncResult<()> {
    let rows_affected = conn.execute(
        "UPDATE batches SET company_id = ?1, reference_id = ?2, title = ?3
         WHERE id = ?4 AND deleted = 0",
        params![batch.company_id, batch.reference_id, batch.title, batch.id],
    )?;

    if rows_affected == 0 {
        return Err(SyncError::NotFound(format!("Batch {} not found", batch.id)));
    }
    Ok(())
}

/// Marks the batch and its photos deleted; rows stay for pending queue items
pub fn soft_delete_batch(conn: &Connection, batch_id: &str) -> SyncResult<()> {
    let rows_affected = conn.execute(
        "UPDATE batches SET deleted = 1 WHERE id = ?1 AND deleted = 0",
        params![batch_id],
    )?;

    if rows_affected == 0 {
        return Err(SyncError::NotFound(format!("Batch {} not found", batch_id)));
    }

    conn.execute(
        "UPDATE photos SET deleted = 1 WHERE batch_id = ?1",
        params![batch_id],
    )?;
    Ok(())
}

pub fn get_batch(conn: &Connection, batch_id: &str) -> SyncResult<Option<Batch>> {
    let batch = conn
        .query_row(
            "SELECT id, company_id, reference_id, title FROM batches WHERE id = ?1 AND deleted = 0",
            params![batch_id],
            |row| Batch::try_from(row),
        )
        .optional()?;
    Ok(batch)
}

pub fn insert_photo(conn: &Connection, photo: &PhotoRecord) -> SyncResult<()> {
    conn.execute(
        "INSERT INTO photos (id, batch_id, local_path, remote_url, annotation)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            photo.id,
            photo.batch_id,
            photo.local_path,
            photo.remote_url,
            photo.annotation
        ],
    )?;
    Ok(())
}

pub fn update_photo_annotation(conn: &Connection, photo_id: &str, annotation: Option<&str>) -> SyncResult<()> {
    let rows_affected = conn.execute(
        "UPDATE photos SET annotation = ?1 WHERE id = ?2 AND deleted = 0",
        params![annotation, photo_id],
    )?;

    if rows_affected == 0 {
        return Err(SyncError::NotFound(format!("Photo {} not found", photo_id)));
    }
    Ok(())
}

pub fn get_photo(conn: &Connection, photo_id: &str) -> SyncResult<Option<PhotoRecord>> {
    let photo = conn
        .query_row(
            "SELECT id, batch_id, local_path, remote_url, annotation
             FROM photos WHERE id = ?1 AND deleted = 0",
            params![photo_id],
            |row| PhotoRecord::try_from(row),
        )
        .optional()?;
    Ok(photo)
}

pub fn list_photos(conn: &Connection, batch_id: &str) -> SyncResult<Vec<PhotoRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, batch_id, local_path, remote_url, annotation
         FROM photos
         WHERE batch_id = ?1 AND deleted = 0
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let photos = stmt
        .query_map(params![batch_id], |row| PhotoRecord::try_from(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(photos)
}
