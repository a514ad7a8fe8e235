//! CRM/ERP synchronizer: pushes queued record mutations to the backend.

use crate::error::RemoteError;
use crate::models::{Operation, ResourceType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Pushes one mutation to the remote system of record
#[async_trait]
pub trait RemoteSynchronizer: Send + Sync {
    async fn sync(
        &self,
        resource_type: ResourceType,
        object_id: &str,
        operation: Operation,
        payload: &Value,
    ) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSyncConfig {
    /// e.g. `https://erp.example.com/api/v1`
    pub base_url: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

impl HttpSyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

impl Default for HttpSyncConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_token: None,
            timeout_secs: 30,
        }
    }
}

/// JSON-over-HTTP synchronizer
///
/// `Create` → `POST {base}/batches`, `Update` → `PUT {base}/batches/{id}`,
/// `Delete` → `DELETE {base}/batches/{id}` (photos likewise). A 404 on delete means the record
/// is already gone and counts as success.
#[derive(Clone)]
pub struct HttpSynchronizer {
    client: reqwest::Client,
    config: HttpSyncConfig,
}

impl HttpSynchronizer {
    pub fn new(config: HttpSyncConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(concat!("qc-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpSyncConfig {
        &self.config
    }

    fn collection_url(&self, resource_type: ResourceType) -> String {
        let collection = match resource_type {
            ResourceType::Batch => "batches",
            ResourceType::Photo => "photos",
        };
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), collection)
    }

    fn record_url(&self, resource_type: ResourceType, object_id: &str) -> String {
        format!("{}/{}", self.collection_url(resource_type), object_id)
    }
}

#[async_trait]
impl RemoteSynchronizer for HttpSynchronizer {
    async fn sync(
        &self,
        resource_type: ResourceType,
        object_id: &str,
        operation: Operation,
        payload: &Value,
    ) -> Result<(), RemoteError> {
        let request = match operation {
            Operation::Create => self.client.post(self.collection_url(resource_type)).json(payload),
            Operation::Update => self
                .client
                .put(self.record_url(resource_type, object_id))
                .json(payload),
            Operation::Delete => self.client.delete(self.record_url(resource_type, object_id)),
        };

        let request = match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();
        log::debug!(
            "{} {} {} -> {}",
            operation.as_str(),
            resource_type.as_str(),
            object_id,
            status
        );

        if response.status().is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        classify_status(status, operation, &body)
    }
}

/// Maps a non-success HTTP status to the outcome recorded on the queue item
pub(crate) fn classify_status(status: u16, operation: Operation, body: &str) -> Result<(), RemoteError> {
    if status == 404 && operation == Operation::Delete {
        return Ok(());
    }

    let message = if body.is_empty() {
        format!("Server returned status {}", status)
    } else {
        format!("Server returned status {}: {}", status, truncate(body, 200))
    };

    if status >= 500 || status == 408 || status == 429 {
        Err(RemoteError::transient(message))
    } else {
        Err(RemoteError::permanent(message))
    }
}

fn classify_transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_builder() {
        RemoteError::permanent(format!("Invalid request: {}", err))
    } else {
        RemoteError::transient(format!("Request failed: {}", err))
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        for status in [500, 502, 503, 408, 429] {
            let err = classify_status(status, Operation::Update, "").unwrap_err();
            assert!(err.retryable, "status {}", status);
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 409, 422] {
            let err = classify_status(status, Operation::Create, "bad").unwrap_err();
            assert!(!err.retryable, "status {}", status);
            assert!(err.message.contains("bad"));
        }
    }

    #[test]
    fn test_delete_of_missing_record_succeeds() {
        assert!(classify_status(404, Operation::Delete, "").is_ok());
    }

    #[test]
    fn test_urls() {
        let sync = HttpSynchronizer::new(HttpSyncConfig::new("https://erp.example.com/api/")).unwrap();
        assert_eq!(
            sync.collection_url(ResourceType::Batch),
            "https://erp.example.com/api/batches"
        );
        assert_eq!(
            sync.record_url(ResourceType::Photo, "p1"),
            "https://erp.example.com/api/photos/p1"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("äöü", 2), "äö");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
