pub mod schema;

use crate::error::{SyncError, SyncResult};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Current time as epoch milliseconds, the unit of every queue timestamp
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared handle to the local SQLite store
///
/// Cloning yields another handle to the same connection. The lock is only held
/// for the duration of a closure and never across an `.await`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database file and applies the schema
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();

        // Make sure the directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> SyncResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SyncResult<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SyncResult<T>) -> SyncResult<T> {
        let guard = self.conn.lock().map_err(|_| SyncError::LockPoisoned)?;
        f(&guard)
    }

    /// Runs `f` inside a transaction, committed only if `f` succeeds
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> SyncResult<T>) -> SyncResult<T> {
        let mut guard = self.conn.lock().map_err(|_| SyncError::LockPoisoned)?;
        let tx = guard.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
