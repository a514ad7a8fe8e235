//! Plumbing shared by the mutation coordinator and the photo upload worker.

use crate::error::RemoteError;
use crate::models::CycleReport;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// In-memory guard allowing one cycle per worker at a time
///
/// Not a durable lock: a crash mid-cycle leaves claimed rows behind, which the
/// recovery sweep in `init` resets.
#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    running: AtomicBool,
}

impl SingleFlight {
    /// `None` if a cycle is already running
    pub(crate) fn try_acquire(&self) -> Option<FlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flag: &self.running,
            })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Clears the flag when dropped, also when the cycle bails out with an error
pub(crate) struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Volatile log of recent cycles (lost on restart)
#[derive(Debug)]
pub(crate) struct SessionLog {
    entries: Mutex<VecDeque<CycleReport>>,
    capacity: usize,
}

impl SessionLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&self, report: CycleReport) {
        if let Ok(mut guard) = self.entries.lock() {
            guard.push_back(report);
            while guard.len() > self.capacity {
                guard.pop_front();
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<CycleReport> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Slot holding the cancellation token of a spawned loop
#[derive(Debug, Default)]
pub(crate) struct TaskSlot {
    token: Mutex<Option<CancellationToken>>,
}

impl TaskSlot {
    /// Installs a fresh token, `None` if a loop is already armed
    pub(crate) fn arm(&self) -> Option<CancellationToken> {
        let mut guard = self.token.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_some() {
            return None;
        }
        let token = CancellationToken::new();
        *guard = Some(token.clone());
        Some(token)
    }

    /// Cancels the armed loop; returns whether one was armed
    pub(crate) fn disarm(&self) -> bool {
        let mut guard = self.token.lock().unwrap_or_else(|p| p.into_inner());
        match guard.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.token
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

/// Runs a collaborator call on its own task so a panic inside it becomes an
/// ordinary failed attempt instead of tearing down the cycle
pub(crate) async fn call_guarded<T, F>(fut: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => Err(RemoteError::transient(format!("collaborator task failed: {}", e))),
    }
}
