//! Local writes paired with their queue entries.
//!
//! Every helper commits the record change and the matching mutation (and, for
//! new photos, the upload request) in one transaction, so a record is never
//! stored without the queue entry that will sync it.

use crate::database::Database;
use crate::error::SyncResult;
use crate::models::{Batch, NewMutation, NewPhotoUpload, Operation, PhotoRecord, ResourceType};
use crate::queue::{insert_mutation, insert_photo_upload};
use crate::services::record_store;
use serde_json::json;

/// Queue entries created for a captured photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    pub mutation_id: String,
    pub upload_id: String,
}

/// Stores a new batch and enqueues its `Create` mutation
pub fn capture_batch_create(db: &Database, batch: &Batch) -> SyncResult<String> {
    db.with_tx(|tx| {
        record_store::insert_batch(tx, batch)?;
        insert_mutation(
            tx,
            &NewMutation::new(
                ResourceType::Batch,
                &batch.id,
                Operation::Create,
                serde_json::to_value(batch)?,
            ),
        )
    })
}

pub fn capture_batch_update(db: &Database, batch: &Batch) -> SyncResult<String> {
    db.with_tx(|tx| {
        record_store::update_batch(tx, batch)?;
        insert_mutation(
            tx,
            &NewMutation::new(
                ResourceType::Batch,
                &batch.id,
                Operation::Update,
                serde_json::to_value(batch)?,
            ),
        )
    })
}

pub fn capture_batch_delete(db: &Database, batch_id: &str) -> SyncResult<String> {
    db.with_tx(|tx| {
        record_store::soft_delete_batch(tx, batch_id)?;
        insert_mutation(
            tx,
            &NewMutation::new(
                ResourceType::Batch,
                batch_id,
                Operation::Delete,
                json!({ "id": batch_id }),
            ),
        )
    })
}

/// Stores a captured photo, enqueues its binary upload and its `Create` mutation
pub fn capture_photo(db: &Database, photo: &PhotoRecord) -> SyncResult<CapturedPhoto> {
    db.with_tx(|tx| {
        record_store::insert_photo(tx, photo)?;

        let upload_id = insert_photo_upload(
            tx,
            &NewPhotoUpload {
                photo_id: photo.id.clone(),
                batch_id: photo.batch_id.clone(),
                local_path: photo.local_path.clone(),
            },
        )?;

        let mutation_id = insert_mutation(
            tx,
            &NewMutation::new(
                ResourceType::Photo,
                &photo.id,
                Operation::Create,
                json!({
                    "id": photo.id,
                    "batch_id": photo.batch_id,
                    "annotation": photo.annotation,
                }),
            ),
        )?;

        Ok(CapturedPhoto {
            mutation_id,
            upload_id,
        })
    })
}

/// Updates the defect annotation of a photo and enqueues an `Update` mutation
pub fn capture_photo_annotation(
    db: &Database,
    photo_id: &str,
    annotation: Option<&str>,
) -> SyncResult<String> {
    db.with_tx(|tx| {
        record_store::update_photo_annotation(tx, photo_id, annotation)?;
        insert_mutation(
            tx,
            &NewMutation::new(
                ResourceType::Photo,
                photo_id,
                Operation::Update,
                json!({ "id": photo_id, "annotation": annotation }),
            ),
        )
    })
}
