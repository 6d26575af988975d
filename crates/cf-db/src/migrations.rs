//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use cf_core::{Error, Result};
use rusqlite::Connection;

/// V1: initial schema -- tasks, pipeline operations, and the result cache.
const V1_INITIAL: &str = r#"
-- Tasks. Lease columns are only meaningful while status = 'processing'.
CREATE TABLE tasks (
    id               TEXT PRIMARY KEY,
    task_type        TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'pending',
    input_files      TEXT NOT NULL DEFAULT '[]',
    output_files     TEXT NOT NULL DEFAULT '[]',
    config           TEXT NOT NULL DEFAULT '{}',
    progress         REAL NOT NULL DEFAULT 0.0,
    error_message    TEXT,
    result           TEXT,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    priority         INTEGER NOT NULL DEFAULT 5,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    locked_by        TEXT,
    locked_at        TEXT,
    lease_expires_at TEXT,
    started_at       TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    completed_at     TEXT
);

CREATE INDEX idx_tasks_queue ON tasks(status, priority, created_at);
CREATE INDEX idx_tasks_lease ON tasks(status, lease_expires_at);

-- Ordered steps of combined tasks.
CREATE TABLE task_operations (
    task_id        TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    sequence_index INTEGER NOT NULL,
    op_type        TEXT NOT NULL,
    config         TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (task_id, sequence_index)
);

-- Content-addressed step results.
CREATE TABLE cache_entries (
    cache_key    TEXT PRIMARY KEY,
    op_type      TEXT NOT NULL,
    output_files TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    expires_at   TEXT NOT NULL
);

CREATE INDEX idx_cache_entries_expires ON cache_entries(expires_at);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit()
            .map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}
