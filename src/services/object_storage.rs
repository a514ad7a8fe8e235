use crate::error::RemoteError;
use crate::models::{PhotoUploadItem, UploadTarget};
use async_trait::async_trait;
use std::path::Path;
use webdav_storage::{sanitize_segment, WebDavStorage};

/// Destination for photo binaries
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads the file and returns the URL it is reachable under
    async fn upload(
        &self,
        local_path: &str,
        file_name: &str,
        company_id: &str,
        reference_id: &str,
    ) -> Result<String, RemoteError>;
}

#[async_trait]
impl ObjectStorage for WebDavStorage {
    async fn upload(
        &self,
        local_path: &str,
        file_name: &str,
        company_id: &str,
        reference_id: &str,
    ) -> Result<String, RemoteError> {
        Ok(self
            .upload_file(local_path, file_name, company_id, reference_id)
            .await?)
    }
}

/// Remote file name for a queued photo
///
/// Deterministic per queue item, so a retried upload overwrites its earlier
/// partial attempt instead of leaving a second object behind.
pub fn upload_file_name(item: &PhotoUploadItem, target: &UploadTarget) -> String {
    let extension = Path::new(&item.local_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string());

    format!(
        "{}_{}_{}.{}",
        sanitize_segment(&target.reference_id).replace(char::is_whitespace, "_"),
        sanitize_segment(&item.photo_id),
        item.created_at,
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadStatus;

    fn item(local_path: &str) -> PhotoUploadItem {
        PhotoUploadItem {
            id: "q1".to_string(),
            photo_id: "p1".to_string(),
            batch_id: "b1".to_string(),
            local_path: local_path.to_string(),
            upload_status: UploadStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            error_message: None,
            retryable: true,
            created_at: 1_700_000_000_000,
        }
    }

    fn target() -> UploadTarget {
        UploadTarget {
            company_id: "acme".to_string(),
            reference_id: "PO 4711".to_string(),
        }
    }

    #[test]
    fn test_file_name_keeps_extension() {
        let name = upload_file_name(&item("/data/photos/a.PNG"), &target());
        assert_eq!(name, "PO_4711_p1_1700000000000.png");
    }

    #[test]
    fn test_file_name_defaults_to_jpg() {
        let name = upload_file_name(&item("/data/photos/raw"), &target());
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_file_name_is_stable_across_attempts() {
        let mut retried = item("/data/photos/a.jpg");
        let first = upload_file_name(&retried, &target());
        retried.attempts = 2;
        assert_eq!(first, upload_file_name(&retried, &target()));
    }
}
