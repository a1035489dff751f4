//! Domain model types shared by the store, the cache engine and its consumers.
//!
//! The remote API is loosely typed (ids and flags arrive as strings), so every
//! inbound resource goes through [`NewForm::from_remote`] before it reaches the
//! store.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{RemoteError, ValidationError};

// ---------------------------------------------------------------------------
// Form records
// ---------------------------------------------------------------------------

/// Validated input for inserting or updating a cached form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewForm {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub entry_count: u64,
    pub is_active: bool,
    #[serde(default)]
    pub raw_data: Option<Value>,
}

impl NewForm {
    /// A minimal active form with no snapshot.
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            entry_count: 0,
            is_active: true,
            raw_data: None,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn with_entry_count(mut self, entry_count: u64) -> Self {
        self.entry_count = entry_count;
        self
    }

    pub fn with_raw_data(mut self, raw_data: Value) -> Self {
        self.raw_data = Some(raw_data);
        self
    }

    /// Normalize one resource object as returned by the remote API.
    ///
    /// `key_id` is the mapping key the object was listed under, used when the
    /// object itself carries no `id`. The full object is kept as `raw_data`.
    pub fn from_remote(value: &Value, key_id: Option<&str>) -> Result<Self, ValidationError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ValidationError::new("form", "is not a JSON object"))?;

        let id = match obj.get("id") {
            Some(v) => json_id(v).ok_or_else(|| ValidationError::new("id", "is not an integer"))?,
            None => key_id
                .and_then(|k| k.trim().parse::<i64>().ok())
                .ok_or_else(|| ValidationError::new("id", "is missing"))?,
        };
        if id <= 0 {
            return Err(ValidationError::new("id", "must be positive"));
        }

        let title = obj
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ValidationError::new("title", "is missing or blank"))?
            .to_string();

        let trashed = obj.get("is_trash").and_then(json_flag).unwrap_or(false);
        let is_active = obj.get("is_active").and_then(json_flag).unwrap_or(true) && !trashed;

        let entry_count = match obj.get("entry_count") {
            None | Some(Value::Null) => 0,
            Some(v) => json_count(v)
                .ok_or_else(|| ValidationError::new("entry_count", "is not a non-negative integer"))?,
        };

        Ok(Self {
            id,
            title,
            entry_count,
            is_active,
            raw_data: Some(value.clone()),
        })
    }
}

/// One row of the `forms` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFormRecord {
    pub id: i64,
    pub title: String,
    pub entry_count: u64,
    pub is_active: bool,
    pub raw_data: Option<Value>,
    pub last_synced: DateTime<Utc>,
}

impl CachedFormRecord {
    /// The record as a JSON resource: the stored snapshot when present,
    /// otherwise a projection of the cached columns.
    pub fn to_resource(&self) -> Value {
        match &self.raw_data {
            Some(raw) if raw.is_object() => raw.clone(),
            _ => serde_json::json!({
                "id": self.id.to_string(),
                "title": self.title,
                "entry_count": self.entry_count.to_string(),
                "is_active": if self.is_active { "1" } else { "0" },
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Outcome of one `sync_all_forms` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub discovered: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub last_sync_time: DateTime<Utc>,
}

/// Phase reported to the sync progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    FetchingActive,
    Probing,
    Persisting,
    Complete,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FetchingActive => write!(f, "fetching_active"),
            Self::Probing => write!(f, "probing"),
            Self::Persisting => write!(f, "persisting"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A progress event emitted during a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub current: usize,
    pub found: usize,
}

/// Cache freshness as judged by the configured max age.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

/// Summary of the cache contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_forms: u64,
    pub active_count: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Result of probing a single form id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: i64,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub form: Option<NewForm>,
    /// Underlying failure, when the error came from the remote.
    #[serde(skip)]
    pub(crate) cause: Option<RemoteError>,
}

impl ProbeResult {
    pub(crate) fn found(form: NewForm) -> Self {
        Self {
            id: form.id,
            found: true,
            error: None,
            form: Some(form),
            cause: None,
        }
    }

    pub(crate) fn absent(id: i64) -> Self {
        Self {
            id,
            found: false,
            error: None,
            form: None,
            cause: None,
        }
    }

    pub(crate) fn failed(id: i64, error: impl Into<String>) -> Self {
        Self {
            id,
            found: false,
            error: Some(error.into()),
            form: None,
            cause: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Cumulative probe counters for the lifetime of one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStats {
    pub attempted: u64,
    pub failed: u64,
    pub found: u64,
    /// Most recent failures, oldest first, capped at `max_recorded_errors`.
    pub errors: VecDeque<String>,
}

// ---------------------------------------------------------------------------
// Loose JSON helpers
// ---------------------------------------------------------------------------

/// An id given as a JSON integer or a numeric string.
pub(crate) fn json_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A flag given as `"1"`/`"0"`, a boolean or a number.
pub(crate) fn json_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A count given as a JSON integer or a numeric string.
pub(crate) fn json_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) if s.trim().is_empty() => Some(0),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render a JSON id as the string form used in API-facing results.
pub(crate) fn json_id_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_remote_normalizes_string_fields() {
        let raw = json!({
            "id": "12",
            "title": "Contact Us",
            "entry_count": "42",
            "is_active": "0",
        });
        let form = NewForm::from_remote(&raw, None).unwrap();
        assert_eq!(form.id, 12);
        assert_eq!(form.title, "Contact Us");
        assert_eq!(form.entry_count, 42);
        assert!(!form.is_active);
        assert_eq!(form.raw_data, Some(raw));
    }

    #[test]
    fn test_from_remote_uses_key_when_id_missing() {
        let raw = json!({ "title": "Survey", "is_active": "1" });
        let form = NewForm::from_remote(&raw, Some("7")).unwrap();
        assert_eq!(form.id, 7);
        assert!(form.is_active);
        assert_eq!(form.entry_count, 0);
    }

    #[test]
    fn test_from_remote_trashed_is_inactive() {
        let raw = json!({ "id": 3, "title": "Old", "is_active": "1", "is_trash": "1" });
        assert!(!NewForm::from_remote(&raw, None).unwrap().is_active);
    }

    #[test]
    fn test_from_remote_rejects_blank_title() {
        let raw = json!({ "id": "4", "title": "   " });
        let err = NewForm::from_remote(&raw, None).unwrap_err();
        assert_eq!(err.field, "title");
    }

    #[test]
    fn test_from_remote_rejects_bad_entry_count() {
        let raw = json!({ "id": "4", "title": "x", "entry_count": "-3" });
        let err = NewForm::from_remote(&raw, None).unwrap_err();
        assert_eq!(err.field, "entry_count");
    }

    #[test]
    fn test_to_resource_without_snapshot() {
        let record = CachedFormRecord {
            id: 2,
            title: "Inactive".into(),
            entry_count: 0,
            is_active: false,
            raw_data: None,
            last_synced: Utc::now(),
        };
        let resource = record.to_resource();
        assert_eq!(resource["id"], "2");
        assert_eq!(resource["is_active"], "0");
    }
}
