//! Error types for the formcache core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. The split mirrors the recovery policy callers apply:
//! configuration errors are fatal, store errors surface as-is, remote errors
//! may be retried when transient, and sync errors mean the cache may be
//! incomplete.

use rusqlite::ErrorCode;
use thiserror::Error;
use tracing::error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An operation ran before `init` or after `close`.
    #[error("store is not initialized")]
    NotInitialized,

    /// The store location cannot be opened or written.
    #[error("store unavailable at '{path}': {detail}")]
    Unavailable { path: String, detail: String },

    /// The backing file exists but is not a usable database.
    #[error("store is corrupt: {0}")]
    Corrupt(String),

    /// A uniqueness or check constraint rejected the write.
    #[error("store constraint violated: {0}")]
    ConstraintViolation(String),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Underlying rusqlite error that has no more specific class.
    #[error("database error: {0}")]
    SqliteError(rusqlite::Error),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(err.to_string()),
            Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
                error!(target: "formcache::corruption", error = %err, "store corruption detected");
                Self::Corrupt(err.to_string())
            }
            _ => Self::SqliteError(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote-call errors
// ---------------------------------------------------------------------------

/// Errors from a single call against the remote forms API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The request did not complete in time.
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// The connection was refused, reset or dropped.
    #[error("connection error for {endpoint}: {detail}")]
    Connection { endpoint: String, detail: String },

    /// Credentials were rejected.
    #[error("authentication rejected by {endpoint} (HTTP {status})")]
    Auth { endpoint: String, status: u16 },

    /// The resource does not exist.
    #[error("{endpoint} not found (HTTP 404)")]
    NotFound { endpoint: String },

    /// Any other non-success HTTP status.
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The body did not have the expected shape.
    #[error("malformed response from {endpoint}: {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    /// Transport failure that fits no other class.
    #[error("remote transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// A definitive "does not exist" answer.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// The remote rejected our credentials; nothing else will work either.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Whole-operation failures of `sync_all_forms`.
///
/// Per-item failures never show up here; they are accumulated in
/// [`SyncResult::errors`](crate::models::SyncResult).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The active-form listing could not be fetched.
    #[error("sync aborted: active form listing failed: {0}")]
    ListUnavailable(#[source] RemoteError),

    /// The active-form listing had an unexpected top-level shape.
    #[error("sync aborted: malformed active form listing: {0}")]
    MalformedListing(String),

    /// A probe showed the remote is unusable (e.g. credentials revoked).
    #[error("sync aborted: remote unusable while probing form {id}: {source}")]
    RemoteUnusable {
        id: i64,
        #[source]
        source: RemoteError,
    },

    /// Store failure outside of per-row writes.
    #[error("sync database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Cache engine errors
// ---------------------------------------------------------------------------

/// Errors returned by [`FormCache`](crate::cache::FormCache) methods.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cache store error: {0}")]
    Database(#[from] DatabaseError),

    #[error("cache remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("cache sync error: {0}")]
    Sync(#[from] SyncError),
}

impl CacheError {
    /// Whether the engine was used outside its `init`/`close` window.
    pub fn is_not_initialized(&self) -> bool {
        matches!(
            self,
            Self::Database(DatabaseError::NotInitialized)
                | Self::Sync(SyncError::Database(DatabaseError::NotInitialized))
        )
    }
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A loosely-typed JSON value failed to validate into a typed record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid form data: field '{field}' {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Form source errors
// ---------------------------------------------------------------------------

/// Failures resolving the current form collection.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("form source remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("form source cache error: {0}")]
    Cache(#[from] CacheError),

    /// Neither a collection, a cache nor a remote was available.
    #[error("no form collection available: supply forms or configure a remote API")]
    Unavailable,
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict detection, resolution and import.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The import payload is not valid JSON.
    #[error("import payload is not valid JSON: {0}")]
    Parse(String),

    /// The import payload is JSON but not a usable form.
    #[error(transparent)]
    InvalidForm(#[from] ValidationError),

    /// No unique title could be found within the search bound.
    #[error("could not find a free import title for '{0}'")]
    TitleExhausted(String),

    #[error("conflict check failed: {0}")]
    Source(#[from] SourceError),

    #[error("conflict remote error: {0}")]
    Remote(#[from] RemoteError),
}

// ---------------------------------------------------------------------------
// Template errors
// ---------------------------------------------------------------------------

/// Errors from template cloning and listing.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The fetched template has no well-formed fields collection.
    #[error("invalid template structure for form {id}: {detail}")]
    InvalidStructure { id: i64, detail: String },

    /// A rename referenced a label that no field carries.
    #[error("field with label '{0}' not found in template")]
    FieldNotFound(String),

    /// A rename would make the field's label imply a different kind of data.
    #[error("dangerous rename of '{original}' ({from}) to '{new_label}' (implies {to})")]
    DangerousRename {
        original: String,
        new_label: String,
        from: String,
        to: String,
    },

    /// The requested title is empty.
    #[error("template clone title must not be empty")]
    EmptyTitle,

    #[error("template source error: {0}")]
    Source(#[from] SourceError),

    #[error("template remote error: {0}")]
    Remote(#[from] RemoteError),
}
