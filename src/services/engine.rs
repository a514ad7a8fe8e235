//! Composition root wiring the queues, workers and collaborators together.

use crate::config::SyncConfig;
use crate::database::Database;
use crate::error::SyncResult;
use crate::models::{CycleReport, SyncStats};
use crate::queue::{MutationQueue, PhotoUploadQueue};
use crate::services::connectivity::NetworkMonitor;
use crate::services::mutation_sync::MutationSyncCoordinator;
use crate::services::object_storage::ObjectStorage;
use crate::services::photo_upload::PhotoUploadWorker;
use crate::services::record_store::{RecordStore, SqliteRecordStore};
use crate::services::remote_sync::{HttpSyncConfig, HttpSynchronizer, RemoteSynchronizer};
use crate::services::reporter::{ErrorReporter, LogReporter};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use webdav_storage::{WebDavConfig, WebDavStorage};

/// Everything needed to run the engine against real backends
///
/// ```toml
/// database_path = "/data/qc/sync.db"
///
/// [sync]
/// photo_interval_secs = 30
///
/// [webdav]
/// server_url = "https://cloud.example.com"
/// username = "qc"
/// app_password = "..."
/// remote_root = "QC-Photos"
///
/// [http]
/// base_url = "https://erp.example.com/api/v1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    #[serde(default)]
    pub sync: SyncConfig,
    pub webdav: WebDavConfig,
    pub http: HttpSyncConfig,
}

impl EngineConfig {
    pub fn from_toml(s: &str) -> SyncResult<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// Remote collaborators the workers talk to
#[derive(Clone)]
pub struct Collaborators {
    pub batch_sync: Arc<dyn RemoteSynchronizer>,
    pub photo_sync: Arc<dyn RemoteSynchronizer>,
    pub storage: Arc<dyn ObjectStorage>,
    pub reporter: Arc<dyn ErrorReporter>,
}

#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    network: NetworkMonitor,
    mutations: MutationSyncCoordinator,
    photos: PhotoUploadWorker,
}

impl SyncEngine {
    /// Starts out online; feed connectivity changes through [`SyncEngine::network`]
    pub fn new(db: Database, collaborators: Collaborators, config: SyncConfig) -> Self {
        let network = NetworkMonitor::new(true);
        let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db.clone()));

        let mutations = MutationSyncCoordinator::new(
            MutationQueue::new(db.clone()),
            collaborators.batch_sync,
            collaborators.photo_sync,
            Arc::new(network.clone()),
            collaborators.reporter.clone(),
            config.clone(),
        );

        let photos = PhotoUploadWorker::new(
            PhotoUploadQueue::new(db.clone()),
            records,
            collaborators.storage,
            Arc::new(network.clone()),
            collaborators.reporter,
            config,
        );

        Self {
            db,
            network,
            mutations,
            photos,
        }
    }

    /// Opens the database and wires the WebDAV storage and HTTP synchronizer
    pub fn open(config: &EngineConfig) -> SyncResult<Self> {
        let db = Database::open(&config.database_path)?;
        let synchronizer = Arc::new(HttpSynchronizer::new(config.http.clone())?);

        let collaborators = Collaborators {
            batch_sync: synchronizer.clone(),
            photo_sync: synchronizer,
            storage: Arc::new(WebDavStorage::new(config.webdav.clone())),
            reporter: Arc::new(LogReporter),
        };

        log::info!("Sync engine opened at {}", config.database_path.display());
        Ok(Self::new(db, collaborators, config.sync.clone()))
    }

    /// Recovery sweep plus connectivity subscriptions for both workers
    ///
    /// Returns the number of recovered queue items.
    pub fn init(&self) -> SyncResult<usize> {
        let recovered = self.mutations.init()? + self.photos.init()?;
        log::info!("Sync engine initialized ({} item(s) recovered)", recovered);
        Ok(recovered)
    }

    pub fn start(&self) {
        self.mutations.start();
        self.photos.start_photo_sync();
    }

    pub fn stop(&self) {
        self.mutations.stop();
        self.photos.stop_photo_sync();
    }

    pub fn shutdown(&self) {
        self.mutations.shutdown();
        self.photos.shutdown();
        log::info!("Sync engine shut down");
    }

    /// Runs one pass of both workers side by side
    pub async fn trigger_sync(&self) -> SyncResult<(CycleReport, CycleReport)> {
        let (mutations, photos) =
            tokio::join!(self.mutations.trigger_sync(), self.photos.trigger_sync());
        Ok((mutations?, photos?))
    }

    /// Manual retry of every terminally failed item in both queues
    pub fn retry_all_failed(&self) -> SyncResult<usize> {
        Ok(self.mutations.retry_all_failed()? + self.photos.retry_all_failed()?)
    }

    pub fn stats(&self) -> SyncResult<SyncStats> {
        Ok(SyncStats {
            mutations: self.mutations.stats()?,
            photos: self.photos.stats()?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn mutations(&self) -> &MutationSyncCoordinator {
        &self.mutations
    }

    pub fn photos(&self) -> &PhotoUploadWorker {
        &self.photos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::models::{Batch, PhotoRecord};
    use crate::services::capture;
    use crate::services::record_store;
    use crate::testing::{wait_until, FakeStorage, FakeSynchronizer, RecordingReporter};

    struct Harness {
        engine: SyncEngine,
        batch_sync: Arc<FakeSynchronizer>,
        photo_sync: Arc<FakeSynchronizer>,
        storage: Arc<FakeStorage>,
    }

    fn harness(batch_sync: Arc<FakeSynchronizer>) -> Harness {
        crate::logging::init_test_logging();
        let photo_sync = FakeSynchronizer::succeeding();
        let storage = FakeStorage::succeeding();

        let engine = SyncEngine::new(
            Database::open_in_memory().unwrap(),
            Collaborators {
                batch_sync: batch_sync.clone(),
                photo_sync: photo_sync.clone(),
                storage: storage.clone(),
                reporter: Arc::new(RecordingReporter::default()),
            },
            SyncConfig::default(),
        );

        Harness {
            engine,
            batch_sync,
            photo_sync,
            storage,
        }
    }

    #[tokio::test]
    async fn test_capture_then_sync_drains_both_queues() {
        let h = harness(FakeSynchronizer::succeeding());
        let db = h.engine.database();
        let batch = Batch::new("acme", "PO-4711");
        capture::capture_batch_create(db, &batch).unwrap();
        let photo = PhotoRecord::new(&batch.id, "/data/photos/1.jpg");
        capture::capture_photo(db, &photo).unwrap();

        let (mutations, photos) = h.engine.trigger_sync().await.unwrap();

        assert_eq!(mutations.succeeded, 2);
        assert_eq!(photos.succeeded, 1);
        assert_eq!(h.batch_sync.synced_objects(), vec![batch.id.clone()]);
        assert_eq!(h.photo_sync.synced_objects(), vec![photo.id.clone()]);
        assert_eq!(h.storage.upload_count(), 1);

        let stats = h.engine.stats().unwrap();
        assert_eq!(stats.mutations.total(), 0);
        assert_eq!(stats.photos.uploaded, 1);

        let stored = db
            .with_conn(|conn| record_store::get_photo(conn, &photo.id))
            .unwrap()
            .unwrap();
        assert!(stored.remote_url.is_some());
    }

    #[tokio::test]
    async fn test_retry_all_failed_covers_both_queues() {
        let h = harness(FakeSynchronizer::scripted(vec![Err(RemoteError::permanent("400"))]));
        let batch = Batch::new("acme", "PO-1");
        capture::capture_batch_create(h.engine.database(), &batch).unwrap();

        h.engine.trigger_sync().await.unwrap();
        assert_eq!(h.engine.stats().unwrap().mutations.failed, 1);

        assert_eq!(h.engine.retry_all_failed().unwrap(), 1);
        h.engine.trigger_sync().await.unwrap();
        assert_eq!(h.engine.stats().unwrap().mutations.total(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_wakes_both_workers() {
        let h = harness(FakeSynchronizer::succeeding());
        h.engine.network().set_online(false);
        h.engine.init().unwrap();
        h.engine.start();

        let db = h.engine.database();
        let batch = Batch::new("acme", "PO-2");
        capture::capture_batch_create(db, &batch).unwrap();
        capture::capture_photo(db, &PhotoRecord::new(&batch.id, "/data/photos/2.jpg")).unwrap();

        h.engine.network().set_online(true);
        let storage = h.storage.clone();
        wait_until(|| storage.upload_count() == 1).await;
        let engine = h.engine.clone();
        wait_until(|| engine.stats().unwrap().mutations.total() == 0).await;

        h.engine.shutdown();
        assert!(!h.engine.mutations().is_running());
        assert!(!h.engine.photos().is_started());
    }

    #[test]
    fn test_engine_config_from_toml() {
        let config = EngineConfig::from_toml(
            r#"
            database_path = "/data/qc/sync.db"

            [sync]
            photo_interval_secs = 10

            [webdav]
            server_url = "https://cloud.example.com"
            username = "qc"
            app_password = "secret"
            remote_root = "QC-Photos"

            [http]
            base_url = "https://erp.example.com/api/v1"
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.photo_interval_secs, 10);
        assert_eq!(config.sync.mutation_interval_secs, 300);
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.webdav.remote_root, "QC-Photos");
    }
}
