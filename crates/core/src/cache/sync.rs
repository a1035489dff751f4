//! Full reconciliation of the cache against the remote API.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::FormCache;
use crate::config::SyncConfig;
use crate::db::queries::{set_state_row, upsert_form_row, LAST_SYNC_KEY};
use crate::errors::{CacheError, RemoteError, SyncError};
use crate::models::{NewForm, SyncPhase, SyncProgress, SyncResult};
use crate::remote::{parse_form_listing, RemoteCall, FORMS_ENDPOINT};

/// Per-call options for [`FormCache::sync_all_forms`].
#[derive(Clone, Copy, Default)]
pub struct SyncOptions<'a> {
    /// Invoked synchronously at each phase boundary and after every probe.
    pub progress: Option<&'a (dyn Fn(SyncProgress) + Send + Sync)>,
}

impl<'a> SyncOptions<'a> {
    pub fn with_progress(progress: &'a (dyn Fn(SyncProgress) + Send + Sync)) -> Self {
        Self {
            progress: Some(progress),
        }
    }

    fn report(&self, phase: SyncPhase, current: usize, found: usize) {
        if let Some(progress) = self.progress {
            progress(SyncProgress {
                phase,
                current,
                found,
            });
        }
    }
}

impl FormCache {
    /// Reconcile the cache with the remote.
    ///
    /// The active listing is fetched first; every id it does not contain
    /// within `max_gap_span` below the highest known id, every cached id it
    /// does not contain, and a trailing window past the highest id are probed
    /// so inactive forms are discovered too. Everything found is upserted in one
    /// transaction and the completion time is recorded as the last sync.
    ///
    /// Only a failed or malformed listing, an authentication failure while
    /// probing, or a store failure outside per-row writes abort the run.
    /// Everything else is reported in [`SyncResult::errors`].
    #[instrument(parent = &self.span, skip_all)]
    pub async fn sync_all_forms(
        &self,
        remote: &dyn RemoteCall,
        options: SyncOptions<'_>,
    ) -> Result<SyncResult, CacheError> {
        let started = Instant::now();
        let cached_ids: BTreeSet<i64> = self
            .store
            .list_forms(false)
            .map_err(SyncError::from)?
            .into_iter()
            .map(|record| record.id)
            .collect();

        // Phase 1: active listing.
        options.report(SyncPhase::FetchingActive, 0, 0);
        let body = remote
            .get(FORMS_ENDPOINT)
            .await
            .map_err(SyncError::ListUnavailable)?;
        let listing =
            parse_form_listing(&body).map_err(|e| SyncError::MalformedListing(e.to_string()))?;
        let mut errors = listing.errors;
        for error in &errors {
            warn!(%error, "skipping malformed form in active listing");
        }
        let mut discovered: Vec<NewForm> = listing.forms;
        info!(
            active = discovered.len(),
            cached = cached_ids.len(),
            "fetched active listing"
        );

        // Phase 2: probe everything the listing did not cover.
        let active_ids: BTreeSet<i64> = discovered.iter().map(|f| f.id).collect();
        let probe_ids = ids_to_probe(&active_ids, &cached_ids, &self.config.sync);
        debug!(count = probe_ids.len(), "probing ids outside the active listing");
        options.report(SyncPhase::Probing, 0, discovered.len());

        let mut found = discovered.len();
        let mut probed = 0usize;
        let mut auth_failure: Option<(i64, RemoteError)> = None;
        let results = self
            .run_probe_batch(&probe_ids, remote, |result| {
                probed += 1;
                if result.found {
                    found += 1;
                }
                options.report(SyncPhase::Probing, probed, found);
                match &result.cause {
                    Some(cause) if cause.is_auth() => {
                        auth_failure = Some((result.id, cause.clone()));
                        ControlFlow::Break(())
                    }
                    _ => ControlFlow::Continue(()),
                }
            })
            .await;

        if let Some((id, source)) = auth_failure {
            warn!(id, error = %source, "remote rejected credentials while probing, aborting sync");
            return Err(SyncError::RemoteUnusable { id, source }.into());
        }

        for result in results {
            match (result.form, result.error) {
                (Some(form), _) => discovered.push(form),
                (None, Some(error)) => errors.push(format!("form {}: {}", result.id, error)),
                (None, None) => {}
            }
        }

        // Phase 3: persist.
        options.report(SyncPhase::Persisting, 0, discovered.len());
        let finished = Utc::now();
        let stamp = finished.to_rfc3339();
        let persisted = self
            .store
            .transaction(|conn| {
                let mut persisted = 0usize;
                for form in &discovered {
                    match upsert_form_row(conn, form, &stamp) {
                        Ok(()) => persisted += 1,
                        Err(e) => {
                            warn!(id = form.id, error = %e, "failed to persist synced form");
                            errors.push(format!("form {}: {}", form.id, e));
                        }
                    }
                }
                set_state_row(conn, LAST_SYNC_KEY, &stamp)?;
                Ok(persisted)
            })
            .map_err(SyncError::from)?;
        options.report(SyncPhase::Persisting, discovered.len(), persisted);

        let result = SyncResult {
            discovered: persisted,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
            last_sync_time: finished,
        };
        options.report(SyncPhase::Complete, probe_ids.len(), persisted);
        info!(
            discovered = result.discovered,
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "sync complete"
        );
        Ok(result)
    }
}

/// Ids the active listing did not cover, in ascending order:
///
/// - cached ids below the gap span, so known inactive forms stay fresh;
/// - gaps in the last `max_gap_span` ids up to `max_id`;
/// - `trailing_probe_window` ids past `max_id`, stopping at `i64::MAX`.
///
/// `max_id` spans both the listing and the rows already cached.
fn ids_to_probe(
    active_ids: &BTreeSet<i64>,
    cached_ids: &BTreeSet<i64>,
    limits: &SyncConfig,
) -> Vec<i64> {
    let max_id = active_ids
        .iter()
        .chain(cached_ids.iter())
        .copied()
        .max()
        .unwrap_or(0)
        .max(0);
    let span_start = max_id
        .saturating_sub(i64::from(limits.max_gap_span))
        .saturating_add(1)
        .max(1);
    if span_start > 1 {
        debug!(
            max_id,
            span_start,
            max_gap_span = limits.max_gap_span,
            "gap probing limited to the most recent ids"
        );
    }

    let below_span = cached_ids
        .range(1..span_start)
        .copied()
        .filter(|id| !active_ids.contains(id));
    let gaps = (span_start..=max_id).filter(|id| !active_ids.contains(id));
    let trailing = (1..=i64::from(limits.trailing_probe_window))
        .map_while(|offset| max_id.checked_add(offset));
    below_span.chain(gaps).chain(trailing).collect()
}
