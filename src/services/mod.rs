pub mod capture;
pub mod connectivity;
pub mod engine;
pub mod mutation_sync;
pub mod object_storage;
pub mod photo_upload;
pub mod record_store;
pub mod remote_sync;
pub mod reporter;
mod worker_support;

pub use capture::*;
pub use connectivity::{ConnectivityProvider, NetworkMonitor};
pub use engine::{Collaborators, EngineConfig, SyncEngine};
pub use mutation_sync::MutationSyncCoordinator;
pub use object_storage::{upload_file_name, ObjectStorage};
pub use photo_upload::PhotoUploadWorker;
pub use record_store::{RecordStore, SqliteRecordStore};
pub use remote_sync::{HttpSyncConfig, HttpSynchronizer, RemoteSynchronizer};
pub use reporter::{ErrorCategory, ErrorContext, ErrorReporter, LogReporter, Severity};
