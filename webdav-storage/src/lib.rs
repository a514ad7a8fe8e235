//! # WebDAV Storage
//!
//! Object storage for captured QC photos on WebDAV servers (e.g. Nextcloud).
//!
//! Photos are stored below a configurable root as
//! `<root>/<company>/<reference>/<file name>`. Every upload makes sure the
//! collection hierarchy exists first, since WebDAV cannot create nested
//! collections in one call.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use webdav_storage::{WebDavConfig, WebDavStorage};
//!
//! let storage = WebDavStorage::new(WebDavConfig {
//!     server_url: "https://cloud.example.com".to_string(),
//!     username: "qc".to_string(),
//!     app_password: "secret".to_string(),
//!     remote_root: "QC-Photos".to_string(),
//! });
//!
//! let url = storage
//!     .upload_file("/data/photos/p1.jpg", "A-100_p1.jpg", "acme", "A-100")
//!     .await?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connection settings for the WebDAV server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebDavConfig {
    pub server_url: String,
    pub username: String,
    pub app_password: String,
    /// Collection all photos are stored under
    pub remote_root: String,
}

impl WebDavConfig {
    /// Base URL of the user's file space, e.g. `https://host/remote.php/dav/files/qc`
    pub fn files_url(&self) -> String {
        format!(
            "{}/remote.php/dav/files/{}",
            self.server_url.trim_end_matches('/'),
            self.username
        )
    }
}

/// Errors that can occur while storing a photo
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Local file not found: {0}")]
    MissingFile(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebDAV client error: {0}")]
    Client(String),
    #[error("Server rejected upload with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("WebDAV transport error: {0}")]
    Transport(String),
}

impl StorageError {
    /// Whether another attempt may succeed later
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::MissingFile(_) | StorageError::Client(_) => false,
            StorageError::Io(_) | StorageError::Transport(_) => true,
            StorageError::Rejected { status, .. } => is_retryable_status(*status),
        }
    }
}

/// 5xx, request timeout and rate limiting are worth retrying; other 4xx are not.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

impl From<reqwest_dav::Error> for StorageError {
    fn from(err: reqwest_dav::Error) -> Self {
        match err {
            reqwest_dav::Error::Decode(reqwest_dav::DecodeError::Server(server)) => {
                StorageError::Rejected {
                    status: server.response_code,
                    message: server.message,
                }
            }
            other => StorageError::Transport(format!("{:?}", other)),
        }
    }
}

/// Replaces characters that would break a WebDAV path segment
pub fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '#' | '%' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Collections that must exist before a file can be stored, outermost first
pub fn collection_chain(remote_root: &str, company_id: &str, reference_id: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = String::new();

    for part in remote_root.trim_matches('/').split('/').filter(|p| !p.is_empty()) {
        if current.is_empty() {
            current = part.to_string();
        } else {
            current = format!("{}/{}", current, part);
        }
        chain.push(current.clone());
    }

    for part in [sanitize_segment(company_id), sanitize_segment(reference_id)] {
        if current.is_empty() {
            current = part;
        } else {
            current = format!("{}/{}", current, part);
        }
        chain.push(current.clone());
    }

    chain
}

/// Remote path of a photo relative to the user's file space
pub fn remote_file_path(
    remote_root: &str,
    file_name: &str,
    company_id: &str,
    reference_id: &str,
) -> String {
    let chain = collection_chain(remote_root, company_id, reference_id);
    match chain.last() {
        Some(dir) => format!("{}/{}", dir, sanitize_segment(file_name)),
        None => sanitize_segment(file_name),
    }
}

/// Uploads photo binaries to a WebDAV server
pub struct WebDavStorage {
    config: WebDavConfig,
}

impl WebDavStorage {
    /// Create a new storage for the given server
    pub fn new(config: WebDavConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebDavConfig {
        &self.config
    }

    fn create_client(&self) -> Result<reqwest_dav::Client, StorageError> {
        reqwest_dav::ClientBuilder::new()
            .set_host(self.config.files_url())
            .set_auth(reqwest_dav::Auth::Basic(
                self.config.username.clone(),
                self.config.app_password.clone(),
            ))
            .build()
            .map_err(|e| StorageError::Client(format!("{:?}", e)))
    }

    /// Uploads a local file and returns the URL it is reachable under
    pub async fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        file_name: &str,
        company_id: &str,
        reference_id: &str,
    ) -> Result<String, StorageError> {
        let local_path = local_path.as_ref();
        let data = match tokio::fs::read(local_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::MissingFile(local_path.display().to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let client = self.create_client()?;

        for collection in collection_chain(&self.config.remote_root, company_id, reference_id) {
            // Existing collections answer 405; only log
            if let Err(e) = client.mkcol(&collection).await {
                log::debug!("MKCOL '{}' note: {:?}", collection, e);
            }
        }

        let remote_path =
            remote_file_path(&self.config.remote_root, file_name, company_id, reference_id);
        let size = data.len();
        client.put(&remote_path, data).await?;

        log::info!("Uploaded {} ({} bytes) to {}", file_name, size, remote_path);
        Ok(format!("{}/{}", self.config.files_url(), remote_path))
    }
}
