//! # qc-sync
//!
//! Offline-first sync engine for QC photo documentation.
//!
//! Record changes (batches, photo annotations) and captured photo binaries
//! are written to local SQLite queues first and pushed to the backends later:
//!
//! - the [`MutationSyncCoordinator`] drains the mutation queue towards the
//!   CRM/ERP synchronizers, one item at a time,
//! - the [`PhotoUploadWorker`] moves photo binaries to object storage in small
//!   concurrent sub-batches and writes the resulting URL onto the photo record.
//!
//! Both workers run on a timer, on demand and whenever connectivity comes
//! back. Failed items are retried on later cycles up to
//! [`config::MAX_RETRIES`] attempts and then stay `Failed` until a manual retry.
//!
//! ```rust,ignore
//! use qc_sync::{EngineConfig, SyncEngine};
//!
//! qc_sync::logging::init_logging();
//! let engine = SyncEngine::open(&EngineConfig::from_toml(&text)?)?;
//! engine.init()?;
//! engine.start();
//!
//! // Platform network callback
//! engine.network().set_online(false);
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod queue;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::SyncConfig;
pub use database::Database;
pub use error::{RemoteError, SyncError, SyncResult};
pub use services::{
    Collaborators, EngineConfig, MutationSyncCoordinator, PhotoUploadWorker, SyncEngine,
};
