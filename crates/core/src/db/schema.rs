//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "forms table",
        r#"
        CREATE TABLE IF NOT EXISTS forms (
            id           INTEGER PRIMARY KEY,
            title        TEXT    NOT NULL CHECK (length(trim(title)) > 0),
            entry_count  INTEGER NOT NULL DEFAULT 0 CHECK (entry_count >= 0),
            is_active    INTEGER NOT NULL DEFAULT 1 CHECK (is_active IN (0, 1)),
            raw_data     TEXT,
            last_synced  TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_forms_title ON forms (title);
        CREATE INDEX IF NOT EXISTS idx_forms_is_active ON forms (is_active);
        "#,
    ),
    (
        2,
        "sync state",
        r#"
        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
