//! SQLite persistence layer for the form cache.
//!
//! Provides a [`Store`] handle with an explicit lifecycle: it is created from a
//! validated location, opened with [`Store::init`], and released with
//! [`Store::close`]. Every query outside that window fails with
//! [`DatabaseError::NotInitialized`] without touching the disk.

pub mod queries;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::{ConfigError, DatabaseError};

const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Main store handle wrapping an optional SQLite connection.
///
/// File-backed stores run in WAL mode with a busy timeout. The connection is
/// wrapped in a `Mutex` so that `Store` is `Send + Sync`; the lock is never
/// held across an `.await`.
pub struct Store {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl Store {
    /// Create a store handle for `path` without touching the file system.
    ///
    /// An empty path is a configuration error. `":memory:"` selects an
    /// in-memory database.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.to_string_lossy();
        if display.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "cache.db_path".into(),
                detail: "must not be empty".into(),
            });
        }
        let location = if display == MEMORY_PATH {
            Location::Memory
        } else {
            Location::File(path.to_path_buf())
        };
        Ok(Self {
            location,
            conn: Mutex::new(None),
        })
    }

    /// An in-memory store (useful for testing).
    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: Mutex::new(None),
        }
    }

    /// Human-readable location for logs.
    pub fn location(&self) -> String {
        match &self.location {
            Location::File(path) => path.display().to_string(),
            Location::Memory => MEMORY_PATH.to_string(),
        }
    }

    /// Open the connection, create the schema if absent and verify liveness.
    ///
    /// Calling `init` on a healthy, already-open store is a no-op.
    pub fn init(&self) -> Result<(), DatabaseError> {
        let mut guard = self.lock();
        if let Some(conn) = guard.as_ref() {
            if ping(conn) {
                debug!(location = %self.location(), "store already initialized");
                return Ok(());
            }
            warn!(location = %self.location(), "store connection unhealthy, reopening");
            *guard = None;
        }

        info!(location = %self.location(), "opening store");
        let conn = self.open()?;
        schema::run_migrations(&conn)?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        *guard = Some(conn);
        debug!("store initialized");
        Ok(())
    }

    /// Release the connection. Safe to call repeatedly.
    pub fn close(&self) -> Result<(), DatabaseError> {
        let conn = self.lock().take();
        match conn {
            Some(conn) => {
                info!(location = %self.location(), "closing store");
                conn.close().map_err(|(_, e)| DatabaseError::from(e))
            }
            None => Ok(()),
        }
    }

    /// Cheap liveness probe; never fails.
    pub fn is_ready(&self) -> bool {
        self.lock().as_ref().map(ping).unwrap_or(false)
    }

    /// Run `f` against the open connection.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(DatabaseError::NotInitialized)?;
        f(conn)
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(DatabaseError::NotInitialized)?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn open(&self) -> Result<Connection, DatabaseError> {
        match &self.location {
            Location::Memory => {
                let conn = Connection::open_in_memory()?;
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                Ok(conn)
            }
            Location::File(path) => {
                let unavailable = |detail: String| DatabaseError::Unavailable {
                    path: path.display().to_string(),
                    detail,
                };
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
                }
                let conn = Connection::open(path).map_err(|e| unavailable(e.to_string()))?;

                // The first statement is where SQLite notices a foreign file.
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
                debug!(path = %path.display(), "store opened with WAL mode");
                Ok(conn)
            }
        }
    }

    /// If the Mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating a panic.
    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn ping(conn: &Connection) -> bool {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = Store::in_memory();
        assert!(!store.is_ready());
        store.init().expect("failed to init in-memory store");
        assert!(store.is_ready());
    }

    #[test]
    fn test_file_store_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("forms.db");
        let store = Store::new(&path).unwrap();
        store.init().expect("failed to init file store");
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn test_init_is_idempotent() {
        let store = Store::in_memory();
        store.init().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO kv_state (key, value, updated_at) VALUES ('k', 'v', 'now')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        store.init().unwrap();
        // A second init must not reopen (and so wipe) the in-memory database.
        let value: String = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT value FROM kv_state WHERE key = 'k'", [], |row| {
                    row.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(value, "v");
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = Store::in_memory();
        store.init().unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(!store.is_ready());
    }

    #[test]
    fn test_use_before_init_fails() {
        let store = Store::in_memory();
        let result = store.with_conn(|_| Ok(()));
        assert!(matches!(result, Err(DatabaseError::NotInitialized)));
    }

    #[test]
    fn test_use_after_close_fails() {
        let store = Store::in_memory();
        store.init().unwrap();
        store.close().unwrap();
        let result = store.transaction(|_| Ok(()));
        assert!(matches!(result, Err(DatabaseError::NotInitialized)));
    }

    #[test]
    fn test_empty_path_is_config_error() {
        assert!(matches!(
            Store::new(""),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(Store::new("   ").is_err());
    }

    #[test]
    fn test_non_database_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forms.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();
        let store = Store::new(&path).unwrap();
        let result = store.init();
        assert!(matches!(result, Err(DatabaseError::Corrupt(_))), "{result:?}");
        // Data is never deleted on corruption.
        assert!(path.exists());
        assert!(!store.is_ready());
    }

    #[test]
    fn test_unwritable_location_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();
        let store = Store::new(blocker.join("forms.db")).unwrap();
        let result = store.init();
        assert!(matches!(result, Err(DatabaseError::Unavailable { .. })), "{result:?}");
    }

    #[test]
    fn test_transaction_rollback() {
        let store = Store::in_memory();
        store.init().unwrap();

        let result: Result<(), DatabaseError> = store.transaction(|conn| {
            conn.execute(
                "INSERT INTO kv_state (key, value, updated_at) VALUES ('rollback', '1', 'now')",
                [],
            )?;
            Err(DatabaseError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            })
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM kv_state WHERE key = 'rollback'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
