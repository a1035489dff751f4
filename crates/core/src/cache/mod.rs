//! The form cache engine.
//!
//! [`FormCache`] wraps the SQLite [`Store`] and adds everything needed to keep
//! it consistent with the remote API:
//!
//! 1. Record CRUD with explicit insert-vs-update semantics.
//! 2. Cache statistics and staleness against a configured max age.
//! 3. Per-ID probing with retry, backoff and a per-batch circuit breaker
//!    ([`probe`]).
//! 4. Full reconciliation with per-item error accumulation ([`sync`]).
//!
//! Logging goes through the engine's own [`tracing::Span`], which callers may
//! replace with [`FormCache::with_span`]; nothing here touches global logger
//! state.

pub mod probe;
pub mod sync;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, info, info_span, instrument, warn, Span};

use crate::config::CacheConfig;
use crate::db::Store;
use crate::errors::{CacheError, ConfigError, DatabaseError};
use crate::models::{CacheStats, CachedFormRecord, NewForm, ProbeStats, SyncStatus};
use crate::remote::{parse_form_listing, RemoteCall, FORMS_ENDPOINT};

pub use probe::CIRCUIT_BREAKER_OPEN;
pub use sync::SyncOptions;

/// Local cache of remote form metadata.
pub struct FormCache {
    store: Store,
    config: CacheConfig,
    probe_stats: Mutex<ProbeStats>,
    span: Span,
}

impl FormCache {
    /// Create an engine for `config`. Nothing is opened until [`init`].
    ///
    /// [`init`]: FormCache::init
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = Store::new(&config.db_path)?;
        let span = info_span!("form_cache", db = %store.location());
        Ok(Self {
            store,
            config,
            probe_stats: Mutex::new(ProbeStats::default()),
            span,
        })
    }

    /// Replace the span all engine events are recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the store and create the schema if needed. Idempotent.
    pub fn init(&self) -> Result<(), CacheError> {
        let _enter = self.span.enter();
        self.store.init()?;
        info!("form cache ready");
        Ok(())
    }

    /// Close the store. Safe to call repeatedly.
    pub fn close(&self) -> Result<(), CacheError> {
        let _enter = self.span.enter();
        self.store.close()?;
        Ok(())
    }

    /// Liveness check; false when uninitialized, closed or broken.
    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// Fail locally before any remote work when the store is not open.
    fn ensure_ready(&self) -> Result<(), CacheError> {
        if self.store.is_ready() {
            Ok(())
        } else {
            Err(DatabaseError::NotInitialized.into())
        }
    }

    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Insert a new record. Fails on an existing id or a blank title.
    pub fn insert_form(&self, form: &NewForm) -> Result<(), CacheError> {
        let _enter = self.span.enter();
        self.store.insert_form(form)?;
        Ok(())
    }

    /// Update an existing record.
    pub fn update_form(&self, form: &NewForm) -> Result<(), CacheError> {
        let _enter = self.span.enter();
        self.store.update_form(form)?;
        Ok(())
    }

    pub fn get_form(&self, id: i64) -> Result<Option<CachedFormRecord>, CacheError> {
        Ok(self.store.get_form(id)?)
    }

    pub fn list_forms(&self, active_only: bool) -> Result<Vec<CachedFormRecord>, CacheError> {
        Ok(self.store.list_forms(active_only)?)
    }

    // -----------------------------------------------------------------------
    // Stats / status
    // -----------------------------------------------------------------------

    pub fn get_cache_stats(&self) -> Result<CacheStats, CacheError> {
        let (total_forms, active_count) = self.store.count_forms()?;
        Ok(CacheStats {
            total_forms,
            active_count,
            last_sync: self.last_sync_time()?,
        })
    }

    /// Freshness of the cache. An empty cache is always stale.
    pub fn get_sync_status(&self) -> Result<SyncStatus, CacheError> {
        let (total, _) = self.store.count_forms()?;
        let last_sync = self.last_sync_time()?;
        let is_stale = match last_sync {
            _ if total == 0 => true,
            None => true,
            Some(at) => (Utc::now() - at).num_seconds() > self.config.max_age_secs as i64,
        };
        debug!(parent: &self.span, total, ?last_sync, is_stale, "computed sync status");
        Ok(SyncStatus {
            last_sync,
            is_stale,
        })
    }

    /// Snapshot of the cumulative probe counters.
    pub fn get_last_probe_stats(&self) -> ProbeStats {
        self.lock_stats().clone()
    }

    /// Last full sync, falling back to the newest row for caches that were
    /// filled by inserts or probes only.
    fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
        match self.store.last_sync()? {
            Some(at) => Ok(Some(at)),
            None => Ok(self.store.latest_form_sync()?),
        }
    }

    // -----------------------------------------------------------------------
    // Remote listing
    // -----------------------------------------------------------------------

    /// Fetch and normalize the active-form listing without touching the store.
    #[instrument(parent = &self.span, skip_all)]
    pub async fn fetch_active_forms(
        &self,
        remote: &dyn RemoteCall,
    ) -> Result<Vec<NewForm>, CacheError> {
        self.ensure_ready()?;
        let body = remote.get(FORMS_ENDPOINT).await?;
        let listing = parse_form_listing(&body)?;
        for error in &listing.errors {
            warn!(%error, "skipping malformed form in active listing");
        }
        debug!(count = listing.forms.len(), "fetched active forms");
        Ok(listing.forms)
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, ProbeStats> {
        self.probe_stats.lock().unwrap_or_else(|poisoned| {
            warn!("probe stats mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use crate::remote::fake::FakeRemote;
    use serde_json::json;

    pub(crate) fn ready_cache() -> FormCache {
        let cache = FormCache::new(CacheConfig::in_memory()).unwrap();
        cache.init().unwrap();
        cache
    }

    #[test]
    fn test_insert_then_get_round_trips() {
        let cache = ready_cache();
        let form = NewForm::new(1, "Active Form")
            .with_entry_count(12)
            .with_raw_data(json!({"id": "1", "title": "Active Form"}));
        cache.insert_form(&form).unwrap();

        let record = cache.get_form(1).unwrap().unwrap();
        assert_eq!(record.id, form.id);
        assert_eq!(record.title, form.title);
        assert_eq!(record.entry_count, form.entry_count);
        assert_eq!(record.is_active, form.is_active);
        assert_eq!(record.raw_data, form.raw_data);
    }

    #[test]
    fn test_second_insert_is_constraint_error() {
        let cache = ready_cache();
        cache.insert_form(&NewForm::new(1, "A")).unwrap();
        let err = cache.insert_form(&NewForm::new(1, "A")).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Database(DatabaseError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_blank_title_is_constraint_error() {
        let cache = ready_cache();
        let err = cache.insert_form(&NewForm::new(3, " ")).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Database(DatabaseError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_get_before_init_fails() {
        let cache = FormCache::new(CacheConfig::in_memory()).unwrap();
        let err = cache.get_form(1).unwrap_err();
        assert!(err.is_not_initialized());
        assert!(!cache.is_ready());
    }

    #[test]
    fn test_use_after_close_fails() {
        let cache = ready_cache();
        cache.close().unwrap();
        cache.close().unwrap();
        assert!(cache.get_cache_stats().unwrap_err().is_not_initialized());
    }

    #[test]
    fn test_empty_db_path_is_config_error() {
        let mut config = CacheConfig::in_memory();
        config.db_path = "".into();
        assert!(matches!(
            FormCache::new(config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_cache_stats() {
        let cache = ready_cache();
        cache.insert_form(&NewForm::new(1, "A")).unwrap();
        cache.insert_form(&NewForm::new(2, "B").inactive()).unwrap();
        let stats = cache.get_cache_stats().unwrap();
        assert_eq!(stats.total_forms, 2);
        assert_eq!(stats.active_count, 1);
        assert!(stats.last_sync.is_some());
    }

    #[test]
    fn test_empty_cache_is_stale() {
        let cache = ready_cache();
        let status = cache.get_sync_status().unwrap();
        assert!(status.is_stale);
        assert!(status.last_sync.is_none());
    }

    #[test]
    fn test_fresh_rows_are_not_stale() {
        let cache = ready_cache();
        cache.insert_form(&NewForm::new(1, "A")).unwrap();
        assert!(!cache.get_sync_status().unwrap().is_stale);
    }

    #[test]
    fn test_old_sync_is_stale() {
        let mut config = CacheConfig::in_memory();
        config.max_age_secs = 60;
        let cache = FormCache::new(config).unwrap();
        cache.init().unwrap();
        cache.insert_form(&NewForm::new(1, "A")).unwrap();
        let old = Utc::now() - chrono::Duration::hours(2);
        cache
            .store
            .set_state(crate::db::queries::LAST_SYNC_KEY, &old.to_rfc3339())
            .unwrap();
        assert!(cache.get_sync_status().unwrap().is_stale);
    }

    #[tokio::test]
    async fn test_fetch_active_forms_normalizes() {
        let cache = ready_cache();
        let remote = FakeRemote::not_found();
        remote.push(
            "/forms",
            Ok(json!({
                "1": {"id": "1", "title": "A", "is_active": "1", "entry_count": "5"},
                "4": {"id": "4", "title": "D", "is_active": "1", "entry_count": "0"},
            })),
        );
        let forms = cache.fetch_active_forms(&remote).await.unwrap();
        assert_eq!(forms.len(), 2);
        assert_eq!(forms[0].entry_count, 5);
        // Fetching never writes.
        assert_eq!(cache.get_cache_stats().unwrap().total_forms, 0);
    }

    #[tokio::test]
    async fn test_fetch_active_forms_classifies_auth() {
        let cache = ready_cache();
        let remote = FakeRemote::new(|_, endpoint, _| {
            Err(RemoteError::Auth {
                endpoint: endpoint.to_string(),
                status: 401,
            })
        });
        let err = cache.fetch_active_forms(&remote).await.unwrap_err();
        assert!(matches!(err, CacheError::Remote(RemoteError::Auth { .. })));
    }

    #[tokio::test]
    async fn test_fetch_active_forms_before_init_makes_no_calls() {
        let cache = FormCache::new(CacheConfig::in_memory()).unwrap();
        let remote = FakeRemote::not_found();
        let err = cache.fetch_active_forms(&remote).await.unwrap_err();
        assert!(err.is_not_initialized());
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_active_forms_after_close_makes_no_calls() {
        let cache = ready_cache();
        cache.close().unwrap();
        let remote = FakeRemote::not_found();
        let err = cache.fetch_active_forms(&remote).await.unwrap_err();
        assert!(err.is_not_initialized());
        assert_eq!(remote.call_count(), 0);
    }
}
