//! Title conflict detection and resolution for form imports.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection**: finding an existing form whose title exactly matches an
//!    import candidate, from the cache (complete discovery) or the active
//!    listing.
//! 2. **Resolution**: picking the next free `"<title> (Import N)"`.
//! 3. **Import**: creating the (possibly renamed) form remotely and writing it
//!    through to the cache.

pub mod detector;
pub mod resolver;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ConflictError, ValidationError};

pub use detector::{find_title_conflict, next_import_title, MAX_IMPORT_SUFFIX};
pub use resolver::ConflictResolver;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Categorisation of a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    None,
    /// Another form already carries the exact title.
    Title,
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Title => write!(f, "title"),
        }
    }
}

/// The existing form a candidate collides with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetails {
    pub existing_id: String,
    pub existing_title: String,
}

/// Outcome of a conflict check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    pub has_conflict: bool,
    pub conflict_type: ConflictType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_details: Option<ConflictDetails>,
}

impl ConflictInfo {
    pub fn none() -> Self {
        Self {
            has_conflict: false,
            conflict_type: ConflictType::None,
            conflict_details: None,
        }
    }

    pub fn title(existing_id: impl Into<String>, existing_title: impl Into<String>) -> Self {
        Self {
            has_conflict: true,
            conflict_type: ConflictType::Title,
            conflict_details: Some(ConflictDetails {
                existing_id: existing_id.into(),
                existing_title: existing_title.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Import payloads
// ---------------------------------------------------------------------------

/// A validated form definition awaiting import.
#[derive(Debug, Clone, PartialEq)]
pub struct FormDefinition {
    title: String,
    body: Map<String, Value>,
}

impl FormDefinition {
    /// Parse and validate an import payload.
    pub fn parse(json_text: &str) -> Result<Self, ConflictError> {
        let value: Value =
            serde_json::from_str(json_text).map_err(|e| ConflictError::Parse(e.to_string()))?;
        Ok(Self::from_value(value)?)
    }

    /// Validate a JSON value: an object with a non-blank string `title` and,
    /// if present, an array of `fields`.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(body) = value else {
            return Err(ValidationError::new("form", "is not a JSON object"));
        };
        let title = body
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ValidationError::new("title", "is missing or blank"))?
            .to_string();
        if let Some(fields) = body.get("fields") {
            if !fields.is_array() {
                return Err(ValidationError::new("fields", "is not an array"));
            }
        }
        Ok(Self { title, body })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The same definition under a different title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.body
            .insert("title".into(), Value::String(self.title.clone()));
        self
    }

    /// Body for `POST /forms`: the definition without its own `id`.
    pub fn to_create_payload(&self) -> Value {
        let mut body = self.body.clone();
        body.remove("id");
        Value::Object(body)
    }
}

/// Knobs for [`ConflictResolver::import_form`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Check inactive forms too, through the cache.
    pub use_complete_discovery: bool,
    /// Scan the cache for existing `(Import N)` titles.
    pub use_cache: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            use_complete_discovery: false,
            use_cache: true,
        }
    }
}

/// What an import did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Created,
    CreatedWithModifiedTitle,
}

impl std::fmt::Display for ImportAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::CreatedWithModifiedTitle => write!(f, "created_with_modified_title"),
        }
    }
}

/// Result of [`ConflictResolver::import_form`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    pub action: ImportAction,
    pub form_title: String,
    pub conflicts_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
}
