//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use tf_core::{Error, Result};

/// V1: jobs and their variants.
const V1_INITIAL: &str = r#"
CREATE TABLE jobs (
    id                 TEXT PRIMARY KEY,
    input_ref          TEXT NOT NULL,
    requested_profiles TEXT NOT NULL,
    status             TEXT NOT NULL DEFAULT 'pending',
    error_message      TEXT,
    created_at         TEXT NOT NULL,
    finished_at        TEXT
);

CREATE TABLE variants (
    id                       TEXT PRIMARY KEY,
    job_id                   TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    position                 INTEGER NOT NULL,
    profile_name             TEXT NOT NULL,
    profile_height           INTEGER NOT NULL,
    profile_bitrate          TEXT NOT NULL,
    status                   TEXT NOT NULL DEFAULT 'pending',
    progress_percent         REAL NOT NULL DEFAULT 0,
    current_position_seconds REAL NOT NULL DEFAULT 0,
    total_duration_seconds   REAL,
    output_ref               TEXT,
    error_message            TEXT,
    exit_code                INTEGER,
    created_at               TEXT NOT NULL,
    started_at               TEXT,
    finished_at              TEXT
);

CREATE INDEX idx_jobs_created_at ON jobs(created_at);
CREATE UNIQUE INDEX idx_variants_job_position ON variants(job_id, position);
CREATE INDEX idx_variants_status ON variants(status);
"#;

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

        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}
