//! Conflict-aware form import.
//!
//! The [`ConflictResolver`] checks a candidate's title against existing forms,
//! renames it to a free `(Import N)` title when needed and creates it. A
//! failing cache never blocks an import: every cache path falls back to the
//! remote active listing.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::detector::{find_title_conflict, next_import_title};
use super::{ConflictInfo, FormDefinition, ImportAction, ImportOptions, ImportResult};
use crate::cache::{FormCache, SyncOptions};
use crate::errors::{ConflictError, SourceError};
use crate::models::{json_id_string, NewForm};
use crate::remote::{RemoteCall, FORMS_ENDPOINT};
use crate::source::FormSource;

/// Detects and resolves title conflicts, optionally backed by a cache.
pub struct ConflictResolver {
    remote: Arc<dyn RemoteCall>,
    cache: Option<Arc<FormCache>>,
}

impl ConflictResolver {
    pub fn new(remote: Arc<dyn RemoteCall>) -> Self {
        Self {
            remote,
            cache: None,
        }
    }

    /// Attach a cache for complete discovery and import numbering.
    pub fn with_cache(mut self, cache: Arc<FormCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Check `candidate` for a title collision.
    ///
    /// With complete discovery and an attached cache, inactive forms are
    /// considered too; the cache is refreshed first when empty or stale.
    /// Otherwise (or if the cache fails) only the active listing is checked.
    #[instrument(skip_all, fields(title = %candidate.title(), complete = use_complete_discovery))]
    pub async fn detect_conflicts(
        &self,
        candidate: &FormDefinition,
        use_complete_discovery: bool,
    ) -> Result<ConflictInfo, ConflictError> {
        if use_complete_discovery {
            match &self.cache {
                Some(cache) => match self.fresh_cached_forms(cache).await {
                    Ok(forms) => return Ok(find_title_conflict(candidate.title(), &forms)),
                    Err(e) => {
                        warn!(error = %e, "cache unusable for conflict check, falling back to active listing")
                    }
                },
                None => debug!("no cache attached, checking active listing only"),
            }
        }
        let forms = FormSource::Remote(self.remote.as_ref()).load().await?;
        Ok(find_title_conflict(candidate.title(), &forms))
    }

    /// Rename `candidate` to a free `(Import N)` title when `info` reports a
    /// conflict; otherwise return it unchanged.
    #[instrument(skip_all, fields(title = %candidate.title()))]
    pub async fn resolve_conflicts(
        &self,
        candidate: &FormDefinition,
        info: &ConflictInfo,
        use_cache: bool,
    ) -> Result<FormDefinition, ConflictError> {
        if !info.has_conflict {
            return Ok(candidate.clone());
        }

        let cache = self.cache.as_deref().filter(|_| use_cache);
        let forms = match FormSource::prefer(cache, None) {
            source @ FormSource::Cached(_) => match source.load().await {
                Ok(forms) => forms,
                Err(e) => {
                    warn!(error = %e, "cache unusable for import numbering, using active listing");
                    self.active_forms().await?
                }
            },
            _ => self.active_forms().await?,
        };

        let title = next_import_title(candidate.title(), &forms)?;
        info!(from = %candidate.title(), to = %title, "resolved title conflict");
        Ok(candidate.clone().with_title(title))
    }

    /// Parse, check, rename if needed and create a form.
    #[instrument(skip_all)]
    pub async fn import_form(
        &self,
        json_text: &str,
        options: ImportOptions,
    ) -> Result<ImportResult, ConflictError> {
        let candidate = FormDefinition::parse(json_text)?;
        let info = self
            .detect_conflicts(&candidate, options.use_complete_discovery)
            .await?;
        let resolved = self
            .resolve_conflicts(&candidate, &info, options.use_cache)
            .await?;

        let payload = resolved.to_create_payload();
        let created = self.remote.post(FORMS_ENDPOINT, &payload).await?;
        let form_id = Some(json_id_string(created.get("id"))).filter(|id| !id.is_empty());

        if let Some(id) = &form_id {
            self.write_through(id, &payload, &created);
        }

        let action = if info.has_conflict {
            ImportAction::CreatedWithModifiedTitle
        } else {
            ImportAction::Created
        };
        info!(title = %resolved.title(), form_id = ?form_id, %action, "imported form");
        Ok(ImportResult {
            success: true,
            action,
            form_title: resolved.title().to_string(),
            conflicts_resolved: info.has_conflict,
            form_id,
        })
    }

    async fn active_forms(&self) -> Result<Vec<Value>, SourceError> {
        FormSource::Remote(self.remote.as_ref()).load().await
    }

    /// Every cached form, after a sync if the cache is empty or stale.
    async fn fresh_cached_forms(&self, cache: &FormCache) -> Result<Vec<Value>, SourceError> {
        let status = cache.get_sync_status()?;
        if status.is_stale {
            info!(last_sync = ?status.last_sync, "cache stale, syncing before conflict check");
            let result = cache
                .sync_all_forms(self.remote.as_ref(), SyncOptions::default())
                .await?;
            if !result.errors.is_empty() {
                warn!(errors = result.errors.len(), "cache refresh finished with item errors");
            }
        }
        FormSource::Cached(cache).load().await
    }

    /// Record a created form in the cache. Failures are logged only.
    fn write_through(&self, id: &str, payload: &Value, created: &Value) {
        let Some(cache) = self.cache.as_deref().filter(|c| c.is_ready()) else {
            return;
        };
        let mut record = match created {
            Value::Object(_) if created.get("title").is_some() => created.clone(),
            _ => payload.clone(),
        };
        if let Some(obj) = record.as_object_mut() {
            obj.insert("id".into(), Value::String(id.to_string()));
        }
        let outcome = NewForm::from_remote(&record, Some(id))
            .map_err(|e| e.to_string())
            .and_then(|form| cache.insert_form(&form).map_err(|e| e.to_string()));
        match outcome {
            Ok(()) => debug!(id, "wrote imported form through to cache"),
            Err(error) => warn!(id, %error, "failed to write imported form to cache"),
        }
    }
}
