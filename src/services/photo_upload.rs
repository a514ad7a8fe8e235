//! Photo upload worker
//!
//! Moves captured photo binaries from local storage to object storage. Items
//! are uploaded in sub-batches: each sub-batch runs concurrently, sub-batches
//! run one after another. The worker has its own start/stop lifecycle,
//! independent of the mutation coordinator.

use crate::config::SyncConfig;
use crate::database::now_ms;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::models::{CycleReport, PhotoUploadItem, PhotoUploadStats, SkipReason, UploadStatus};
use crate::queue::PhotoUploadQueue;
use crate::services::connectivity::ConnectivityProvider;
use crate::services::object_storage::{upload_file_name, ObjectStorage};
use crate::services::record_store::RecordStore;
use crate::services::reporter::{ErrorCategory, ErrorContext, ErrorReporter, Severity};
use crate::services::worker_support::{call_guarded, SessionLog, SingleFlight, TaskSlot};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

const COMPONENT: &str = "photo_upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadOutcome {
    Uploaded,
    Retrying,
    Failed,
}

#[derive(Clone)]
pub struct PhotoUploadWorker {
    inner: Arc<Inner>,
}

struct Inner {
    queue: PhotoUploadQueue,
    records: Arc<dyn RecordStore>,
    storage: Arc<dyn ObjectStorage>,
    connectivity: Arc<dyn ConnectivityProvider>,
    reporter: Arc<dyn ErrorReporter>,
    config: SyncConfig,
    flight: SingleFlight,
    timer: TaskSlot,
    listener: TaskSlot,
    session: SessionLog,
}

impl PhotoUploadWorker {
    pub fn new(
        queue: PhotoUploadQueue,
        records: Arc<dyn RecordStore>,
        storage: Arc<dyn ObjectStorage>,
        connectivity: Arc<dyn ConnectivityProvider>,
        reporter: Arc<dyn ErrorReporter>,
        config: SyncConfig,
    ) -> Self {
        let session = SessionLog::new(config.session_log_capacity);
        Self {
            inner: Arc::new(Inner {
                queue,
                records,
                storage,
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

    /// Resets uploads stranded in `Uploading` and subscribes to connectivity
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(&self) -> SyncResult<usize> {
        let recovered = self.recover_claimed()?;
        if recovered > 0 {
            log::warn!("Recovered {} stale upload(s)", recovered);
        }

        self.spawn_connectivity_listener();
        Ok(recovered)
    }

    /// Starts the upload timer; the first cycle runs right away
    ///
    /// Does nothing outside a tokio runtime.
    pub fn start_photo_sync(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::error!("Photo sync needs a tokio runtime, not starting");
            return;
        };
        let Some(token) = self.inner.timer.arm() else {
            log::warn!("Photo sync already started");
            return;
        };

        let period = self.inner.config.photo_interval();
        log::info!("Starting photo sync with {} second interval", period.as_secs());

        let this = self.clone();
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !this.inner.connectivity.is_online() {
                            log::debug!("Offline, skipping scheduled photo sync");
                            continue;
                        }
                        this.run_scheduled("timer").await;
                    }
                }
            }

            log::info!("Photo sync timer stopped");
        });
    }

    pub fn stop_photo_sync(&self) {
        if self.inner.timer.disarm() {
            log::info!("Stopping photo sync");
        }
    }

    pub fn shutdown(&self) {
        self.stop_photo_sync();
        self.inner.listener.disarm();
    }

    pub fn is_started(&self) -> bool {
        self.inner.timer.is_armed()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.flight.is_running()
    }

    /// Scheduled pass; skipped while the worker is not started
    pub async fn run_cycle(&self) -> SyncResult<CycleReport> {
        if !self.is_started() {
            log::debug!("Photo sync not started, skipping cycle");
            return Ok(CycleReport::skipped(SkipReason::NotStarted));
        }
        self.run_pass().await
    }

    /// Manual pass, also when the timer is stopped
    pub async fn trigger_sync(&self) -> SyncResult<CycleReport> {
        log::info!("Manual photo sync requested");
        self.run_pass().await
    }

    pub fn retry_all_failed(&self) -> SyncResult<usize> {
        let reset = self.inner.queue.retry_all_failed()?;
        log::info!("Reset {} failed upload(s) for retry", reset);
        Ok(reset)
    }

    pub fn stats(&self) -> SyncResult<PhotoUploadStats> {
        self.inner.queue.stats()
    }

    pub fn recent_cycles(&self) -> Vec<CycleReport> {
        self.inner.session.snapshot()
    }

    pub fn queue(&self) -> &PhotoUploadQueue {
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

    /// `Uploading` rows are all stranded when no pass of ours is running
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
                            log::info!("Back online, running photo sync");
                            this.run_scheduled("connectivity").await;
                        }
                        was_online = online;
                    }
                }
            }
        });
    }

    async fn run_pass(&self) -> SyncResult<CycleReport> {
        let result = self.process().await;
        match &result {
            Ok(report) if !report.was_skipped() => {
                if report.fetched > 0 {
                    log::info!(
                        "Photo sync: {} fetched, {} uploaded, {} retrying, {} failed",
                        report.fetched,
                        report.succeeded,
                        report.retried,
                        report.exhausted
                    );
                }
                self.inner.session.push(report.clone());
            }
            Ok(_) => {}
            Err(e) => log::error!("Photo sync cycle aborted: {}", e),
        }
        result
    }

    async fn process(&self) -> SyncResult<CycleReport> {
        let Some(_flight) = self.inner.flight.try_acquire() else {
            log::debug!("Photo sync already running, skipping");
            return Ok(CycleReport::skipped(SkipReason::AlreadyRunning));
        };

        let mut report = CycleReport::started();
        let config = &self.inner.config;
        let items = self
            .inner
            .queue
            .list_eligible(config.max_retries, config.photo_fetch_limit())?;
        report.fetched = items.len();

        for chunk in items.chunks(config.photo_sub_batch_size.max(1)) {
            self.upload_sub_batch(chunk, &mut report).await?;
        }

        report.purged = self.purge_uploaded()?;
        Ok(report)
    }

    /// Uploads one sub-batch concurrently and waits for every outcome
    async fn upload_sub_batch(&self, chunk: &[PhotoUploadItem], report: &mut CycleReport) -> SyncResult<()> {
        let mut tasks = JoinSet::new();
        for item in chunk {
            let this = self.clone();
            let item = item.clone();
            tasks.spawn(async move { this.upload_one(item).await });
        }

        let mut store_error: Option<SyncError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(UploadOutcome::Uploaded)) => report.succeeded += 1,
                Ok(Ok(UploadOutcome::Retrying)) => report.retried += 1,
                Ok(Ok(UploadOutcome::Failed)) => report.exhausted += 1,
                Ok(Err(e)) => {
                    log::error!("Upload queue update failed: {}", e);
                    if store_error.is_none() {
                        store_error = Some(e);
                    }
                }
                Err(e) => log::error!("Upload task failed: {}", e),
            }
        }

        match store_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn upload_one(&self, item: PhotoUploadItem) -> SyncResult<UploadOutcome> {
        let queue = &self.inner.queue;
        queue.mark_uploading(&item.id)?;

        let attempt = item.attempts + 1;
        let context = ErrorContext::new(COMPONENT, "upload")
            .item(&item.id)
            .object(&item.photo_id)
            .attempt(attempt);

        match self.transfer(&item).await {
            Ok(url) => {
                queue.update_status(&item.id, UploadStatus::Uploaded, None)?;
                log::info!("Uploaded photo {} to {}", item.photo_id, url);
                self.inner.reporter.track("photo_uploaded", &context);
                Ok(UploadOutcome::Uploaded)
            }
            Err(e) => {
                let status =
                    queue.record_failure(&item.id, &e.message, self.inner.config.max_retries, e.retryable)?;

                let (outcome, severity) = if status == UploadStatus::Failed {
                    log::error!(
                        "Giving up on photo {} after attempt {}: {}",
                        item.photo_id,
                        attempt,
                        e
                    );
                    (UploadOutcome::Failed, Severity::Error)
                } else {
                    log::warn!(
                        "Upload of photo {} failed (attempt {}), will retry: {}",
                        item.photo_id,
                        attempt,
                        e
                    );
                    (UploadOutcome::Retrying, Severity::Warning)
                };

                self.inner
                    .reporter
                    .report(&e.message, &context, severity, ErrorCategory::PhotoUpload);
                Ok(outcome)
            }
        }
    }

    /// Resolves the target, uploads the binary and stores the URL on the photo
    async fn transfer(&self, item: &PhotoUploadItem) -> Result<String, RemoteError> {
        let records = self.inner.records.clone();
        let photo_id = item.photo_id.clone();
        let batch_id = item.batch_id.clone();
        let target = call_guarded(async move {
            records
                .upload_target(&photo_id, &batch_id)
                .await
                .map_err(|e| RemoteError::transient(format!("Record lookup failed: {}", e)))
        })
        .await?
        .ok_or_else(|| RemoteError::permanent(format!("Photo record {} no longer exists", item.photo_id)))?;

        let file_name = upload_file_name(item, &target);
        let storage = self.inner.storage.clone();
        let local_path = item.local_path.clone();
        let url = call_guarded(async move {
            storage
                .upload(&local_path, &file_name, &target.company_id, &target.reference_id)
                .await
        })
        .await?;

        let records = self.inner.records.clone();
        let photo_id = item.photo_id.clone();
        call_guarded(async move {
            let stored = records
                .set_photo_url(&photo_id, &url)
                .await
                .map_err(|e| RemoteError::transient(format!("Storing photo URL failed: {}", e)))?;
            if stored {
                Ok(url)
            } else {
                Err(RemoteError::permanent(format!(
                    "Photo record {} removed during upload",
                    photo_id
                )))
            }
        })
        .await
    }

    fn purge_uploaded(&self) -> SyncResult<usize> {
        let retention = self.inner.config.uploaded_retention();
        if retention.is_zero() {
            self.inner.queue.purge(UploadStatus::Uploaded)
        } else {
            let cutoff = now_ms() - retention.as_millis() as i64;
            self.inner.queue.purge_older_than(UploadStatus::Uploaded, cutoff)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::{Batch, NewPhotoUpload, PhotoRecord};
    use crate::services::capture::capture_photo;
    use crate::services::connectivity::NetworkMonitor;
    use crate::services::record_store::{self, SqliteRecordStore};
    use crate::testing::{wait_until, FakeStorage, RecordingReporter};
    use std::time::Duration;

    struct Harness {
        worker: PhotoUploadWorker,
        db: Database,
        queue: PhotoUploadQueue,
        storage: Arc<FakeStorage>,
        reporter: Arc<RecordingReporter>,
        monitor: NetworkMonitor,
        batch: Batch,
    }

    fn harness_with(storage: Arc<FakeStorage>, config: SyncConfig, online: bool) -> Harness {
        crate::logging::init_test_logging();
        let db = Database::open_in_memory().unwrap();
        let batch = Batch::new("acme", "PO-4711");
        db.with_conn(|conn| record_store::insert_batch(conn, &batch)).unwrap();

        let queue = PhotoUploadQueue::new(db.clone());
        let reporter = Arc::new(RecordingReporter::default());
        let monitor = NetworkMonitor::new(online);

        let worker = PhotoUploadWorker::new(
            queue.clone(),
            Arc::new(SqliteRecordStore::new(db.clone())),
            storage.clone(),
            Arc::new(monitor.clone()),
            reporter.clone(),
            config,
        );

        Harness {
            worker,
            db,
            queue,
            storage,
            reporter,
            monitor,
            batch,
        }
    }

    fn harness(storage: Arc<FakeStorage>) -> Harness {
        harness_with(storage, SyncConfig::default(), true)
    }

    fn capture(h: &Harness, n: usize) -> (PhotoRecord, String) {
        let photo = PhotoRecord::new(&h.batch.id, format!("/data/photos/{}.jpg", n));
        let captured = capture_photo(&h.db, &photo).unwrap();
        (photo, captured.upload_id)
    }

    #[tokio::test]
    async fn test_fail_fail_succeed_scenario() {
        let h = harness(FakeStorage::scripted(vec![
            Err(RemoteError::transient("connection reset")),
            Err(RemoteError::transient("connection reset")),
        ]));
        let (photo, upload_id) = capture(&h, 1);

        h.worker.trigger_sync().await.unwrap();
        h.worker.trigger_sync().await.unwrap();

        let item = h.queue.get(&upload_id).unwrap().unwrap();
        assert_eq!(item.attempts, 2);
        assert_eq!(item.upload_status, UploadStatus::Pending);

        let report = h.worker.trigger_sync().await.unwrap();
        assert_eq!(report.succeeded, 1);

        let item = h.queue.get(&upload_id).unwrap().unwrap();
        assert_eq!(item.upload_status, UploadStatus::Uploaded);

        let stored = h
            .db
            .with_conn(|conn| record_store::get_photo(conn, &photo.id))
            .unwrap()
            .unwrap();
        let url = stored.remote_url.unwrap();
        assert!(url.starts_with("https://storage.test/acme/PO-4711/"), "{}", url);
        assert_eq!(h.reporter.events(), vec!["photo_uploaded"]);
    }

    #[tokio::test]
    async fn test_exhausted_upload_is_failed() {
        let h = harness(FakeStorage::scripted(vec![
            Err(RemoteError::transient("503")),
            Err(RemoteError::transient("503")),
            Err(RemoteError::transient("503")),
        ]));
        let (_photo, upload_id) = capture(&h, 1);

        for _ in 0..3 {
            h.worker.trigger_sync().await.unwrap();
        }

        let item = h.queue.get(&upload_id).unwrap().unwrap();
        assert_eq!(item.upload_status, UploadStatus::Failed);
        assert_eq!(item.attempts, 3);
        assert_eq!(h.worker.trigger_sync().await.unwrap().fetched, 0);
        assert_eq!(h.storage.upload_count(), 3);

        let stats = h.worker.stats().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn test_missing_record_fails_permanently() {
        let h = harness(FakeStorage::succeeding());
        let upload_id = h
            .queue
            .enqueue(&NewPhotoUpload {
                photo_id: "ghost".to_string(),
                batch_id: h.batch.id.clone(),
                local_path: "/data/photos/ghost.jpg".to_string(),
            })
            .unwrap();

        let report = h.worker.trigger_sync().await.unwrap();

        assert_eq!(report.exhausted, 1);
        assert_eq!(h.storage.upload_count(), 0);
        let item = h.queue.get(&upload_id).unwrap().unwrap();
        assert_eq!(item.upload_status, UploadStatus::Failed);
        assert!(!item.retryable);
        assert_eq!(h.reporter.reports()[0].category, ErrorCategory::PhotoUpload);
    }

    #[tokio::test]
    async fn test_cycle_fetch_is_capped_and_concurrency_bounded() {
        let h = harness(FakeStorage::slow(Duration::from_millis(20)));
        for n in 0..12 {
            capture(&h, n);
        }

        let report = h.worker.trigger_sync().await.unwrap();

        assert_eq!(report.fetched, 10);
        assert_eq!(report.succeeded, 10);
        assert_eq!(h.storage.max_in_flight(), 5);
        assert_eq!(h.worker.stats().unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_run_cycle_skips_when_not_started() {
        let h = harness(FakeStorage::succeeding());
        capture(&h, 1);

        let report = h.worker.run_cycle().await.unwrap();

        assert_eq!(report.skipped, Some(SkipReason::NotStarted));
        assert_eq!(h.storage.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_online_transition_uploads_when_started() {
        let config = SyncConfig {
            photo_interval_secs: 3600,
            ..Default::default()
        };
        let h = harness_with(FakeStorage::succeeding(), config, false);
        h.worker.init().unwrap();
        h.worker.start_photo_sync();
        capture(&h, 1);

        h.monitor.set_online(true);
        let storage = h.storage.clone();
        wait_until(|| storage.upload_count() == 1).await;
        let worker = h.worker.clone();
        wait_until(|| worker.stats().unwrap().uploaded == 1).await;

        // Still online, no transition
        capture(&h, 2);
        h.monitor.set_online(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.storage.upload_count(), 1);

        h.worker.shutdown();
        assert!(!h.worker.is_started());
    }

    #[tokio::test]
    async fn test_concurrent_passes_are_single_flight() {
        let h = harness(FakeStorage::gated());
        capture(&h, 1);

        let first = {
            let worker = h.worker.clone();
            tokio::spawn(async move { worker.trigger_sync().await })
        };
        let storage = h.storage.clone();
        wait_until(|| storage.upload_count() == 1).await;
        assert!(h.worker.is_syncing());

        let second = h.worker.trigger_sync().await.unwrap();
        assert_eq!(second.skipped, Some(SkipReason::AlreadyRunning));

        h.storage.release();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.succeeded, 1);
        assert_eq!(h.storage.upload_count(), 1);
        assert!(!h.worker.is_syncing());
    }

    #[tokio::test]
    async fn test_upload_claimed_just_before_restart_is_processed() {
        let h = harness(FakeStorage::succeeding());
        let (_photo, upload_id) = capture(&h, 1);
        h.queue.mark_uploading(&upload_id).unwrap();

        assert_eq!(h.worker.init().unwrap(), 1);
        let report = h.worker.trigger_sync().await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(h.storage.upload_count(), 1);
        let item = h.queue.get(&upload_id).unwrap().unwrap();
        assert_eq!(item.upload_status, UploadStatus::Uploaded);
        assert_eq!(item.attempts, 1);
        h.worker.shutdown();
    }

    #[tokio::test]
    async fn test_store_failure_waits_for_sub_batch_then_aborts() {
        let config = SyncConfig {
            photo_interval_secs: 3600,
            ..Default::default()
        };
        let h = harness_with(FakeStorage::succeeding(), config, true);
        h.db
            .with_conn(|conn| {
                Ok(conn.execute_batch(
                    "CREATE TRIGGER reject_uploaded BEFORE UPDATE OF upload_status ON photo_upload_queue
                     WHEN NEW.upload_status = 'uploaded'
                     BEGIN SELECT RAISE(ABORT, 'queue write rejected'); END;",
                )?)
            })
            .unwrap();
        for n in 0..6 {
            capture(&h, n);
        }

        // First tick runs straight away through the scheduled path
        h.worker.start_photo_sync();
        let reporter = h.reporter.clone();
        wait_until(|| !reporter.reports().is_empty()).await;
        h.worker.stop_photo_sync();

        let reports = h.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].severity, Severity::Critical);
        assert_eq!(reports[0].category, ErrorCategory::Storage);
        assert!(reports[0].error.contains("queue write rejected"), "{}", reports[0].error);
        assert_eq!(reports[0].context.action, "timer");

        // The whole first sub-batch ran, the second never started
        assert_eq!(h.storage.upload_count(), 5);
        let stats = h.worker.stats().unwrap();
        assert_eq!(stats.uploading, 5);
        assert_eq!(stats.pending, 1);
        assert!(!h.worker.is_syncing());
        assert!(h.worker.recent_cycles().is_empty());

        let result = h.worker.trigger_sync().await;
        assert!(matches!(result, Err(SyncError::Database(_))), "{:?}", result);
        assert!(!h.worker.is_syncing());
    }

    #[test]
    fn test_start_outside_runtime_does_nothing() {
        let h = harness(FakeStorage::succeeding());

        h.worker.start_photo_sync();

        assert!(!h.worker.is_started());
    }

    #[tokio::test]
    async fn test_uploaded_rows_kept_for_retention_window() {
        let h = harness(FakeStorage::succeeding());
        capture(&h, 1);

        let report = h.worker.trigger_sync().await.unwrap();

        assert_eq!(report.purged, 0);
        assert_eq!(h.worker.stats().unwrap().uploaded, 1);
        assert_eq!(h.worker.recent_cycles().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_retention_purges_immediately() {
        let config = SyncConfig {
            uploaded_retention_secs: 0,
            ..Default::default()
        };
        let h = harness_with(FakeStorage::succeeding(), config, true);
        let (_photo, upload_id) = capture(&h, 1);

        let report = h.worker.trigger_sync().await.unwrap();

        assert_eq!(report.purged, 1);
        assert!(h.queue.get(&upload_id).unwrap().is_none());
    }
}
