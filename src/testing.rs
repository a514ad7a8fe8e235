//! Fake collaborators shared by the worker tests.

use crate::error::RemoteError;
use crate::models::{Operation, ResourceType};
use crate::services::object_storage::ObjectStorage;
use crate::services::remote_sync::RemoteSynchronizer;
use crate::services::reporter::{ErrorCategory, ErrorContext, ErrorReporter, Severity};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Synchronizer answering from a script, `Ok` once the script is used up
#[derive(Default)]
pub(crate) struct FakeSynchronizer {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    fallback: Mutex<Option<RemoteError>>,
    calls: Mutex<Vec<(ResourceType, String, Operation)>>,
    gate: Option<Arc<Semaphore>>,
    panic_on_call: bool,
}

impl FakeSynchronizer {
    pub(crate) fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn scripted(outcomes: Vec<Result<(), RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            ..Default::default()
        })
    }

    pub(crate) fn always_failing(error: RemoteError) -> Arc<Self> {
        Arc::new(Self {
            fallback: Mutex::new(Some(error)),
            ..Default::default()
        })
    }

    /// Every call blocks until `release` hands out a permit
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Default::default()
        })
    }

    pub(crate) fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_on_call: true,
            ..Default::default()
        })
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn synced_objects(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, object_id, _)| object_id.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteSynchronizer for FakeSynchronizer {
    async fn sync(
        &self,
        resource_type: ResourceType,
        object_id: &str,
        operation: Operation,
        _payload: &Value,
    ) -> Result<(), RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((resource_type, object_id.to_string(), operation));

        if self.panic_on_call {
            panic!("synchronizer blew up");
        }

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            return outcome;
        }
        match self.fallback.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Object storage answering from a script and tracking upload concurrency
#[derive(Default)]
pub(crate) struct FakeStorage {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    uploads: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl FakeStorage {
    pub(crate) fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn scripted(outcomes: Vec<Result<(), RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            ..Default::default()
        })
    }

    pub(crate) fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Default::default()
        })
    }

    /// Every upload blocks until `release` hands out a permit
    pub(crate) fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Default::default()
        })
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload(
        &self,
        _local_path: &str,
        file_name: &str,
        company_id: &str,
        reference_id: &str,
    ) -> Result<String, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.uploads.lock().unwrap().push(file_name.to_string());

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome.map(|_| {
            format!(
                "https://storage.test/{}/{}/{}",
                company_id, reference_id, file_name
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Reported {
    pub error: String,
    pub context: ErrorContext,
    pub severity: Severity,
    pub category: ErrorCategory,
}

/// Reporter keeping everything in memory
#[derive(Default)]
pub(crate) struct RecordingReporter {
    reports: Mutex<Vec<Reported>>,
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub(crate) fn reports(&self) -> Vec<Reported> {
        self.reports.lock().unwrap().clone()
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, error: &str, context: &ErrorContext, severity: Severity, category: ErrorCategory) {
        self.reports.lock().unwrap().push(Reported {
            error: error.to_string(),
            context: context.clone(),
            severity,
            category,
        });
    }

    fn track(&self, event: &str, _context: &ErrorContext) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

/// Polls `condition` until it holds, panicking after a generous deadline
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
