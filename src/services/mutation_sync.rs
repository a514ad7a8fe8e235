//! Mutation sync coordinator
//!
//! Drains the mutation queue towards the CRM/ERP synchronizers, one item at a
//! time in FIFO order. Cycles are started by a recurring timer, by
//! [`MutationSyncCoordinator::trigger_sync`] and by the device coming back
//! online; all three share one single-flight guard.

use crate::config::SyncConfig;
use crate::database::now_ms;
use crate::error::{RemoteError, SyncResult};
use crate::models::{CycleReport, MutationQueueItem, MutationStatus, QueueStats, ResourceType, SkipReason};
use crate::queue::MutationQueue;
use crate::services::connectivity::ConnectivityProvider;
use crate::services::remote_sync::RemoteSynchronizer;
use crate::services::reporter::{ErrorCategory, ErrorContext, ErrorReporter, Severity};
use crate::services::worker_support::{call_guarded, SessionLog, SingleFlight, TaskSlot};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

const COMPONENT: &str = "mutation_sync";

/// Cloneable handle; clones drive the same queue and share the same guard
#[derive(Clone)]
pub struct MutationSyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    queue: MutationQueue,
    batch_sync: Arc<dyn RemoteSynchronizer>,
    photo_sync: Arc<dyn RemoteSynchronizer>,
    connectivity: Arc<dyn ConnectivityProvider>,
    reporter: Arc<dyn ErrorReporter>,
    config: SyncConfig,
    flight: SingleFlight,
    timer: TaskSlot,
    listener: TaskSlot,
    session: SessionLog,
}

impl MutationSyncCoordinator {
    pub fn new(
        queue: MutationQueue,
        batch_sync: Arc<dyn RemoteSynchronizer>,
        photo_sync: Arc<dyn RemoteSynchronizer>,
        connectivity: Arc<dyn ConnectivityProvider>,
        reporter: Arc<dyn ErrorReporter>,
        config: SyncConfig,
    ) -> Self {
        let session = SessionLog::new(config.session_log_capacity);
        Self {
            inner: Arc::new(Inner {
                queue,
                batch_sync,
                photo_sync,
                connectivity,
                reporter,
                config,
                flight: SingleFlight::default(),
                timer: TaskSlot::default(),
                listener: TaskSlot::default(),
                session,
            }),
        }
    }

    /// Resets items stranded `InProgress` by a previous process and subscribes
    /// to connectivity changes. Returns the number of recovered items.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(&self) -> SyncResult<usize> {
        let recovered = self.recover_claimed()?;
        if recovered > 0 {
            log::warn!("Recovered {} stale in-progress mutation(s)", recovered);
        }

        self.spawn_connectivity_listener();
        Ok(recovered)
    }

    /// Starts the recurring timer; the first cycle runs right away
    ///
    /// Does nothing outside a tokio runtime.
    pub fn start(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::error!("Mutation sync needs a tokio runtime, not starting");
            return;
        };
        let Some(token) = self.inner.timer.arm() else {
            log::warn!("Mutation sync already started");
            return;
        };

        let period = self.inner.config.mutation_interval();
        log::info!("Starting mutation sync with {} second interval", period.as_secs());

        let this = self.clone();
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !this.inner.connectivity.is_online() {
                            log::debug!("Offline, skipping scheduled mutation sync");
                            continue;
                        }
                        this.run_scheduled("timer").await;
                    }
                }
            }

            log::info!("Mutation sync timer stopped");
        });
    }

    /// Stops the timer; a cycle already in flight runs to completion
    pub fn stop(&self) {
        if self.inner.timer.disarm() {
            log::info!("Stopping mutation sync");
        }
    }

    /// Stops the timer and the connectivity listener
    pub fn shutdown(&self) {
        self.stop();
        self.inner.listener.disarm();
    }

    pub fn is_running(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Whether a cycle is in flight right now
    pub fn is_syncing(&self) -> bool {
        self.inner.flight.is_running()
    }

    /// Manual sync; independent of `start`/`stop`
    pub async fn trigger_sync(&self) -> SyncResult<CycleReport> {
        log::info!("Manual mutation sync requested");
        self.run_cycle().await
    }

    /// One pass over the eligible items
    ///
    /// Returns a skipped report if another cycle is running. Collaborator
    /// failures are recorded on the items; only queue store errors are returned.
    pub async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let result = self.process().await;
        match &result {
            Ok(report) if !report.was_skipped() => {
                if report.fetched > 0 {
                    log::info!(
                        "Mutation sync: {} fetched, {} completed, {} retrying, {} failed, {} purged",
                        report.fetched,
                        report.succeeded,
                        report.retried,
                        report.exhausted,
                        report.purged
                    );
                }
                self.inner.session.push(report.clone());
            }
            Ok(_) => {}
            Err(e) => log::error!("Mutation sync cycle aborted: {}", e),
        }
        result
    }

    /// Gives every `Failed` mutation a fresh set of attempts
    pub fn retry_all_failed(&self) -> SyncResult<usize> {
        let reset = self.inner.queue.retry_all_failed()?;
        log::info!("Reset {} failed mutation(s) for retry", reset);
        Ok(reset)
    }

    pub fn stats(&self) -> SyncResult<QueueStats> {
        self.inner.queue.stats()
    }

    /// Reports of recent cycles in this process, oldest first
    pub fn recent_cycles(&self) -> Vec<CycleReport> {
        self.inner.session.snapshot()
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.inner.queue
    }

    async fn run_scheduled(&self, trigger: &str) {
        if let Err(e) = self.run_cycle().await {
            self.inner.reporter.report(
                &e.to_string(),
                &ErrorContext::new(COMPONENT, trigger),
                Severity::Critical,
                ErrorCategory::Storage,
            );
        }
    }

    /// Resets claimed rows left behind by a dead process
    ///
    /// While this process has no cycle in flight every `InProgress` row is
    /// stranded, whatever its age. Otherwise only rows past the stale grace
    /// are touched.
    fn recover_claimed(&self) -> SyncResult<usize> {
        let flight = self.inner.flight.try_acquire();
        let cutoff = if flight.is_some() {
            i64::MAX
        } else {
            now_ms() - self.inner.config.stale_grace().as_millis() as i64
        };
        self.inner.queue.recover_stale(cutoff)
    }

    fn spawn_connectivity_listener(&self) {
        let Some(token) = self.inner.listener.arm() else {
            return;
        };

        let mut rx = self.inner.connectivity.subscribe();
        let mut was_online = *rx.borrow_and_update();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *rx.borrow_and_update();
                        if online && !was_online {
                            log::info!("Back online, running mutation sync");
                            this.run_scheduled("connectivity").await;
                        }
                        was_online = online;
                    }
                }
            }
        });
    }

    async fn process(&self) -> SyncResult<CycleReport> {
        let Some(_flight) = self.inner.flight.try_acquire() else {
            log::debug!("Mutation sync already running, skipping");
            return Ok(CycleReport::skipped(SkipReason::AlreadyRunning));
        };

        let mut report = CycleReport::started();
        let items = self
            .inner
            .queue
            .list_eligible(self.inner.config.max_retries, self.inner.config.mutation_batch_limit)?;
        report.fetched = items.len();

        if items.is_empty() {
            return Ok(report);
        }

        for item in &items {
            self.process_item(item, &mut report).await?;
        }

        report.purged = self.purge_completed()?;
        Ok(report)
    }

    async fn process_item(&self, item: &MutationQueueItem, report: &mut CycleReport) -> SyncResult<()> {
        let queue = &self.inner.queue;
        queue.mark_in_progress(&item.id)?;

        match self.dispatch(item).await {
            Ok(()) => {
                queue.update_status(&item.id, MutationStatus::Completed, None)?;
                report.succeeded += 1;
                log::debug!(
                    "Synced {} {} {}",
                    item.operation.as_str(),
                    item.resource_type.as_str(),
                    item.object_id
                );
            }
            Err(e) => {
                let attempt = item.attempts + 1;
                let exhausted = !e.retryable || attempt >= self.inner.config.max_retries;

                if e.retryable {
                    queue.update_status(&item.id, MutationStatus::Failed, Some(&e.message))?;
                } else {
                    queue.mark_permanently_failed(&item.id, &e.message)?;
                }

                if exhausted {
                    report.exhausted += 1;
                    log::error!(
                        "Giving up on {} {} {} after attempt {}: {}",
                        item.operation.as_str(),
                        item.resource_type.as_str(),
                        item.object_id,
                        attempt,
                        e
                    );
                } else {
                    report.retried += 1;
                    log::warn!(
                        "Sync of {} {} failed (attempt {}), will retry: {}",
                        item.resource_type.as_str(),
                        item.object_id,
                        attempt,
                        e
                    );
                }

                self.inner.reporter.report(
                    &e.message,
                    &ErrorContext::new(COMPONENT, item.operation.as_str())
                        .item(&item.id)
                        .object(&item.object_id)
                        .attempt(attempt),
                    if exhausted { Severity::Error } else { Severity::Warning },
                    ErrorCategory::RecordSync,
                );
            }
        }

        Ok(())
    }

    async fn dispatch(&self, item: &MutationQueueItem) -> Result<(), RemoteError> {
        let synchronizer = match item.resource_type {
            ResourceType::Batch => self.inner.batch_sync.clone(),
            ResourceType::Photo => self.inner.photo_sync.clone(),
        };
        let resource_type = item.resource_type;
        let operation = item.operation;
        let object_id = item.object_id.clone();
        let payload = item.payload.clone();

        call_guarded(async move {
            synchronizer
                .sync(resource_type, &object_id, operation, &payload)
                .await
        })
        .await
    }

    fn purge_completed(&self) -> SyncResult<usize> {
        let retention = self.inner.config.completed_retention();
        if retention.is_zero() {
            self.inner.queue.purge(MutationStatus::Completed)
        } else {
            let cutoff = now_ms() - retention.as_millis() as i64;
            self.inner.queue.purge_older_than(MutationStatus::Completed, cutoff)
        }
    }
}
