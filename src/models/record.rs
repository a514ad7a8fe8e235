use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// A documentation batch: all photos captured against one order/inventory id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: String,
    pub company_id: String,
    /// Order or inventory identifier the photos document
    pub reference_id: String,
    pub title: Option<String>,
}

impl Batch {
    /// Creates a new batch with a generated id
    pub fn new(company_id: impl Into<String>, reference_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: company_id.into(),
            reference_id: reference_id.into(),
            title: None,
        }
    }
}

impl<'r> TryFrom<&Row<'r>> for Batch {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'r>) -> Result<Self, Self::Error> {
        Ok(Batch {
            id: row.get("id")?,
            company_id: row.get("company_id")?,
            reference_id: row.get("reference_id")?,
            title: row.get("title")?,
        })
    }
}

/// A captured photo belonging to a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoRecord {
    pub id: String,
    pub batch_id: String,
    pub local_path: String,
    /// Set once the binary reached object storage
    pub remote_url: Option<String>,
    /// Defect annotation entered during capture
    pub annotation: Option<String>,
}

impl PhotoRecord {
    pub fn new(batch_id: impl Into<String>, local_path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            local_path: local_path.into(),
            remote_url: None,
            annotation: None,
        }
    }
}

impl<'r> TryFrom<&Row<'r>> for PhotoRecord {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'r>) -> Result<Self, Self::Error> {
        Ok(PhotoRecord {
            id: row.get("id")?,
            batch_id: row.get("batch_id")?,
            local_path: row.get("local_path")?,
            remote_url: row.get("remote_url")?,
            annotation: row.get("annotation")?,
        })
    }
}

/// Where an uploaded photo belongs in object storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub company_id: String,
    pub reference_id: String,
}
