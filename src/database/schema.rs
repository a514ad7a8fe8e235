use rusqlite::{Connection, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the queue and record schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    // Enable foreign keys
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Schema version table for future migrations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    if current_version < 1 {
        create_schema_v1(conn)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<()> {
    // Table: batches (photos documented against one order/inventory id)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            company_id TEXT NOT NULL,
            reference_id TEXT NOT NULL,
            title TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            deleted INTEGER NOT NULL DEFAULT 0 CHECK(deleted IN (0,1))
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_reference ON batches(reference_id)",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS update_batches_timestamp
         AFTER UPDATE ON batches
         BEGIN
            UPDATE batches SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
         END",
        [],
    )?;

    // Table: photos
    conn.execute(
        "CREATE TABLE IF NOT EXISTS photos (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            local_path TEXT NOT NULL,
            remote_url TEXT,
            annotation TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            deleted INTEGER NOT NULL DEFAULT 0 CHECK(deleted IN (0,1)),
            FOREIGN KEY (batch_id) REFERENCES batches(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_photos_batch ON photos(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS update_photos_timestamp
         AFTER UPDATE ON photos
         BEGIN
            UPDATE photos SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
         END",
        [],
    )?;

    // Table: mutation_queue (record changes awaiting CRM/ERP sync)
    // seq breaks created_at ties so selection stays FIFO
    conn.execute(
        "CREATE TABLE IF NOT EXISTS mutation_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            resource_type TEXT NOT NULL CHECK(resource_type IN ('batch', 'photo')),
            object_id TEXT NOT NULL,
            operation TEXT NOT NULL CHECK(operation IN ('create', 'update', 'delete')),
            payload TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0 CHECK(attempts >= 0),
            last_attempt_at INTEGER,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'in_progress', 'completed', 'failed')),
            error TEXT,
            retryable INTEGER NOT NULL DEFAULT 1 CHECK(retryable IN (0,1)),
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mutation_queue_status ON mutation_queue(status, created_at, seq)",
        [],
    )?;

    // Table: photo_upload_queue (binaries awaiting object storage)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS photo_upload_queue (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            photo_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            local_path TEXT NOT NULL,
            upload_status TEXT NOT NULL DEFAULT 'pending' CHECK(upload_status IN ('pending', 'uploading', 'uploaded', 'failed')),
            attempts INTEGER NOT NULL DEFAULT 0 CHECK(attempts >= 0),
            last_attempt_at INTEGER,
            error_message TEXT,
            retryable INTEGER NOT NULL DEFAULT 1 CHECK(retryable IN (0,1)),
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_photo_upload_queue_status ON photo_upload_queue(upload_status, created_at, seq)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let versions: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_queue_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO mutation_queue (id, resource_type, object_id, operation, payload, status, created_at)
             VALUES ('x', 'batch', 'b1', 'create', '{}', 'done', 0)",
            [],
        );
        assert!(result.is_err());
    }
}
