//! Database migrations.
//!
//! This module contains all SQL migrations for the database schema.
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbox_items(conn)?;
    }
    if current_version < 2 {
        migrate_v2_throttle_and_backfill(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Outbox items table - the delivery queue.
///
/// Timestamps are stored as RFC3339 TEXT and always written by the
/// application so that string comparison matches chronological order.
fn migrate_v1_outbox_items(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbox items");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_items (
            id TEXT PRIMARY KEY,
            integration_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TEXT NOT NULL,
            last_error TEXT,
            provider_response_json TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_items_status_next_attempt
            ON outbox_items(status, next_attempt_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_items_integration_id
            ON outbox_items(integration_id);
        CREATE INDEX IF NOT EXISTS idx_outbox_items_created_at
            ON outbox_items(created_at);
        ",
    )?;

    record_migration(conn, 1, "outbox_items")?;
    Ok(())
}

/// V2: Rate-limit throttling and dead-letter backfill columns.
fn migrate_v2_throttle_and_backfill(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: throttle and backfill");

    conn.execute_batch(
        "
        ALTER TABLE outbox_items ADD COLUMN retry_after_until TEXT;
        ALTER TABLE outbox_items ADD COLUMN retry_after_seconds INTEGER;
        ALTER TABLE outbox_items ADD COLUMN rate_limited_at TEXT;
        ALTER TABLE outbox_items ADD COLUMN critical_error INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE outbox_items ADD COLUMN backfill_eligible INTEGER NOT NULL DEFAULT 0;

        CREATE INDEX IF NOT EXISTS idx_outbox_items_status_retry_after
            ON outbox_items(status, retry_after_until);
        CREATE INDEX IF NOT EXISTS idx_outbox_items_backfill
            ON outbox_items(status, backfill_eligible, updated_at);
        ",
    )?;

    record_migration(conn, 2, "throttle_and_backfill")?;
    Ok(())
}
