use super::mutation::sql_text_enum;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Uploaded,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(UploadStatus::Pending),
            "uploading" => Some(UploadStatus::Uploading),
            "uploaded" => Some(UploadStatus::Uploaded),
            "failed" => Some(UploadStatus::Failed),
            _ => None,
        }
    }
}

sql_text_enum!(UploadStatus, "upload status");

/// Upload request created when a photo is captured
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhotoUpload {
    pub photo_id: String,
    pub batch_id: String,
    pub local_path: String,
}

/// A row of the photo upload queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoUploadItem {
    pub id: String,
    pub photo_id: String,
    pub batch_id: String,
    pub local_path: String,
    pub upload_status: UploadStatus,
    /// Also known as retry count
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
    pub error_message: Option<String>,
    pub retryable: bool,
    pub created_at: i64,
}

impl<'r> TryFrom<&Row<'r>> for PhotoUploadItem {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'r>) -> Result<Self, Self::Error> {
        Ok(PhotoUploadItem {
            id: row.get("id")?,
            photo_id: row.get("photo_id")?,
            batch_id: row.get("batch_id")?,
            local_path: row.get("local_path")?,
            upload_status: row.get("upload_status")?,
            attempts: row.get("attempts")?,
            last_attempt_at: row.get("last_attempt_at")?,
            error_message: row.get("error_message")?,
            retryable: row.get("retryable")?,
            created_at: row.get("created_at")?,
        })
    }
}
