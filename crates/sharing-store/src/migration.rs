//! SQLite schema versions.

use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Schema batches, in order. Version N is `MIGRATIONS[N - 1]`.
const MIGRATIONS: &[&str] = &[
    // v1: documents with their history and position in the changes feed.
    r#"
    CREATE TABLE documents (
        doctype TEXT NOT NULL,
        id TEXT NOT NULL,
        rev TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        body TEXT NOT NULL,               -- JSON, with _id/_rev/_deleted
        history BLOB NOT NULL,            -- CBOR array of revisions, oldest first
        seq INTEGER NOT NULL,             -- position in the doctype's changes feed

        PRIMARY KEY (doctype, id)
    );

    CREATE INDEX idx_documents_seq ON documents(doctype, seq);
    CREATE INDEX idx_documents_live ON documents(doctype, deleted);
    "#,
];

/// Current schema version.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema to [`CURRENT_VERSION`]. Running it again is a no-op.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;
    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema version {} is newer than this build ({})",
            applied, CURRENT_VERSION
        )));
    }

    let tx = conn.transaction()?;
    for (index, batch) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        let version = index as u32 + 1;
        debug!(version, "applying schema migration");
        tx.execute_batch(batch)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, sharing_core::now_millis()],
        )?;
    }
    tx.commit()?;
    Ok(())
}
