//! Typed query helpers for the `forms` and `kv_state` tables.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::Store;
use crate::errors::DatabaseError;
use crate::models::{CachedFormRecord, NewForm};

/// `kv_state` key holding the completion time of the last full sync.
pub const LAST_SYNC_KEY: &str = "last_sync";

const FORM_COLUMNS: &str = "id, title, entry_count, is_active, raw_data, last_synced";

impl Store {
    // -- forms --------------------------------------------------------------

    /// Insert a new form row. An existing id is a constraint violation.
    pub fn insert_form(&self, form: &NewForm) -> Result<(), DatabaseError> {
        check_title(form)?;
        let now = Utc::now().to_rfc3339();
        let raw = encode_raw(form)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO forms (id, title, entry_count, is_active, raw_data, last_synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![form.id, form.title, form.entry_count as i64, form.is_active, raw, now],
            )
            .map_err(|e| match DatabaseError::from(e) {
                DatabaseError::ConstraintViolation(detail) => DatabaseError::ConstraintViolation(
                    format!("form {} already exists or is invalid: {}", form.id, detail),
                ),
                other => other,
            })?;
            debug!(id = form.id, title = %form.title, "inserted form");
            Ok(())
        })
    }

    /// Update an existing form row in place.
    pub fn update_form(&self, form: &NewForm) -> Result<(), DatabaseError> {
        check_title(form)?;
        let now = Utc::now().to_rfc3339();
        let raw = encode_raw(form)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE forms SET title = ?2, entry_count = ?3, is_active = ?4,
                 raw_data = ?5, last_synced = ?6 WHERE id = ?1",
                params![form.id, form.title, form.entry_count as i64, form.is_active, raw, now],
            )?;
            if changed == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "form".into(),
                    id: form.id.to_string(),
                });
            }
            debug!(id = form.id, "updated form");
            Ok(())
        })
    }

    /// Insert or replace a form row (sync path only).
    pub fn upsert_form(&self, form: &NewForm) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| upsert_form_row(conn, form, &now))
    }

    /// Get a form by id.
    pub fn get_form(&self, id: i64) -> Result<Option<CachedFormRecord>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = ?1");
            let row = conn
                .query_row(&sql, params![id], read_form_row)
                .optional()?;
            row.map(RawFormRow::into_record).transpose()
        })
    }

    /// List forms ordered by id, optionally only the active ones.
    pub fn list_forms(&self, active_only: bool) -> Result<Vec<CachedFormRecord>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = if active_only {
                format!("SELECT {FORM_COLUMNS} FROM forms WHERE is_active = 1 ORDER BY id")
            } else {
                format!("SELECT {FORM_COLUMNS} FROM forms ORDER BY id")
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], read_form_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RawFormRow::into_record).collect()
        })
    }

    /// Return `(total, active)` row counts.
    pub fn count_forms(&self) -> Result<(u64, u64), DatabaseError> {
        self.with_conn(|conn| {
            let (total, active): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM forms",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok((total.max(0) as u64, active.max(0) as u64))
        })
    }

    /// Newest `last_synced` across all rows.
    pub fn latest_form_sync(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        self.with_conn(|conn| {
            let latest: Option<String> =
                conn.query_row("SELECT MAX(last_synced) FROM forms", [], |row| row.get(0))?;
            Ok(latest.as_deref().and_then(parse_datetime))
        })
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a key-value state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM kv_state WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()?)
        })
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.with_conn(|conn| set_state_row(conn, key, value))
    }

    /// Completion time of the last full sync, if one was recorded.
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self.get_state(LAST_SYNC_KEY)?.as_deref().and_then(parse_datetime))
    }
}

// ---------------------------------------------------------------------------
// Connection-level helpers (usable inside `Store::transaction`)
// ---------------------------------------------------------------------------

/// Insert or replace one form row on an open connection.
pub(crate) fn upsert_form_row(
    conn: &Connection,
    form: &NewForm,
    now: &str,
) -> Result<(), DatabaseError> {
    check_title(form)?;
    let raw = encode_raw(form)?;
    conn.execute(
        "INSERT INTO forms (id, title, entry_count, is_active, raw_data, last_synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            entry_count = excluded.entry_count,
            is_active = excluded.is_active,
            raw_data = excluded.raw_data,
            last_synced = excluded.last_synced",
        params![form.id, form.title, form.entry_count as i64, form.is_active, raw, now],
    )?;
    debug!(id = form.id, active = form.is_active, "upserted form");
    Ok(())
}

/// Upsert one `kv_state` entry on an open connection.
pub(crate) fn set_state_row(conn: &Connection, key: &str, value: &str) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    debug!(key, value, "set kv_state");
    Ok(())
}

fn check_title(form: &NewForm) -> Result<(), DatabaseError> {
    if form.title.trim().is_empty() {
        return Err(DatabaseError::ConstraintViolation(format!(
            "form {} has an empty title",
            form.id
        )));
    }
    Ok(())
}

fn encode_raw(form: &NewForm) -> Result<Option<String>, DatabaseError> {
    form.raw_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::ConstraintViolation(format!("unserializable raw_data: {e}")))
}

struct RawFormRow {
    id: i64,
    title: String,
    entry_count: i64,
    is_active: bool,
    raw_data: Option<String>,
    last_synced: String,
}

fn read_form_row(row: &Row<'_>) -> rusqlite::Result<RawFormRow> {
    Ok(RawFormRow {
        id: row.get(0)?,
        title: row.get(1)?,
        entry_count: row.get(2)?,
        is_active: row.get(3)?,
        raw_data: row.get(4)?,
        last_synced: row.get(5)?,
    })
}

impl RawFormRow {
    fn into_record(self) -> Result<CachedFormRecord, DatabaseError> {
        let raw_data = self
            .raw_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| {
                tracing::error!(
                    target: "formcache::corruption",
                    id = self.id,
                    error = %e,
                    "cached raw_data is not valid JSON"
                );
                DatabaseError::Corrupt(format!("form {} raw_data: {}", self.id, e))
            })?;
        let last_synced = parse_datetime(&self.last_synced).ok_or_else(|| {
            DatabaseError::Corrupt(format!(
                "form {} last_synced is not a timestamp: {}",
                self.id, self.last_synced
            ))
        })?;
        Ok(CachedFormRecord {
            id: self.id,
            title: self.title,
            entry_count: self.entry_count.max(0) as u64,
            is_active: self.is_active,
            raw_data,
            last_synced,
        })
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
