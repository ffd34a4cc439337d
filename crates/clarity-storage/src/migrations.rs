//! Database schema migrations.
//!
//! Version 1 creates the screenshot_traces, summaries, daily_summaries,
//! api_request_log and settings tables.

use rusqlite::Connection;
use tracing::info;

use clarity_core::error::ClarityError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ClarityError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ClarityError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ClarityError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), ClarityError> {
    conn.execute_batch(
        "
        -- One row per persisted screenshot. Append-only.
        CREATE TABLE IF NOT EXISTS screenshot_traces (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp   INTEGER NOT NULL,
            file_path   TEXT NOT NULL,
            width       INTEGER NOT NULL,
            height      INTEGER NOT NULL,
            file_size   INTEGER NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_traces_timestamp
            ON screenshot_traces (timestamp);

        -- Window summaries over [start_time, end_time).
        CREATE TABLE IF NOT EXISTS summaries (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            start_time       INTEGER NOT NULL,
            end_time         INTEGER NOT NULL,
            content          TEXT NOT NULL,
            screenshot_count INTEGER NOT NULL DEFAULT 0,
            created_at       INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            CHECK (end_time > start_time)
        );

        CREATE INDEX IF NOT EXISTS idx_summaries_start_time
            ON summaries (start_time);

        CREATE TABLE IF NOT EXISTS daily_summaries (
            id                     INTEGER PRIMARY KEY AUTOINCREMENT,
            date                   TEXT NOT NULL UNIQUE,
            content                TEXT NOT NULL,
            screenshot_count       INTEGER NOT NULL DEFAULT 0,
            summary_count          INTEGER NOT NULL DEFAULT 0,
            total_duration_seconds INTEGER NOT NULL DEFAULT 0,
            created_at             INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at             INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- One row per terminal outcome of a remote call.
        CREATE TABLE IF NOT EXISTS api_request_log (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp         INTEGER NOT NULL,
            model             TEXT NOT NULL,
            endpoint          TEXT NOT NULL,
            prompt_tokens     INTEGER,
            completion_tokens INTEGER,
            total_tokens      INTEGER,
            status_code       INTEGER,
            duration_ms       INTEGER NOT NULL,
            success           INTEGER NOT NULL CHECK (success IN (0, 1)),
            error_kind        TEXT,
            error_message     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_api_request_log_timestamp
            ON api_request_log (timestamp);

        CREATE TABLE IF NOT EXISTS settings (
            key         TEXT PRIMARY KEY NOT NULL,
            value       TEXT NOT NULL,
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ClarityError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
