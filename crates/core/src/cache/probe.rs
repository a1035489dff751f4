//! Per-ID probing with retry, backoff and a per-batch circuit breaker.
//!
//! Probes are defensive: a missing form is a normal answer and any other
//! failure is reported in the [`ProbeResult`] instead of being raised, so
//! batches always complete. A cache that is not initialized answers every
//! probe with an error and never calls the remote.

use std::ops::ControlFlow;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::FormCache;
use crate::errors::RemoteError;
use crate::models::{NewForm, ProbeResult};
use crate::remote::{form_endpoint, RemoteCall};

/// Error reported for ids skipped after the breaker opened.
pub const CIRCUIT_BREAKER_OPEN: &str = "Circuit breaker open";

impl FormCache {
    /// Check whether form `id` exists, with a single remote call.
    #[instrument(parent = &self.span, skip(self, remote))]
    pub async fn probe_form_by_id(&self, id: i64, remote: &dyn RemoteCall) -> ProbeResult {
        if let Err(e) = self.ensure_ready() {
            return ProbeResult::failed(id, e.to_string());
        }
        match self.attempt_probe(id, remote).await {
            Ok(Some(form)) => ProbeResult::found(form),
            Ok(None) => ProbeResult::absent(id),
            Err(e) => failed_result(id, e),
        }
    }

    /// Probe `id`, retrying transient failures up to `max_attempts` calls in
    /// total with exponential backoff. A 404 is never retried.
    #[instrument(parent = &self.span, skip(self, remote))]
    pub async fn probe_with_retry(
        &self,
        id: i64,
        remote: &dyn RemoteCall,
        max_attempts: u32,
    ) -> ProbeResult {
        if let Err(e) = self.ensure_ready() {
            return ProbeResult::failed(id, e.to_string());
        }
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt_probe(id, remote).await {
                Ok(Some(form)) => return ProbeResult::found(form),
                Ok(None) => return ProbeResult::absent(id),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient probe failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return failed_result(id, e),
            }
        }
    }

    /// Probe every id in order. After `circuit_breaker_threshold` consecutive
    /// failed probes the remaining ids are answered with
    /// [`CIRCUIT_BREAKER_OPEN`] and no further calls are made.
    #[instrument(parent = &self.span, skip_all, fields(count = ids.len()))]
    pub async fn probe_batch(&self, ids: &[i64], remote: &dyn RemoteCall) -> Vec<ProbeResult> {
        self.run_probe_batch(ids, remote, |_| ControlFlow::Continue(()))
            .await
    }

    /// Batch loop shared with the sync path. `on_result` sees every probed
    /// result and may stop the batch early.
    pub(crate) async fn run_probe_batch<F>(
        &self,
        ids: &[i64],
        remote: &dyn RemoteCall,
        mut on_result: F,
    ) -> Vec<ProbeResult>
    where
        F: FnMut(&ProbeResult) -> ControlFlow<()> + Send,
    {
        if let Err(e) = self.ensure_ready() {
            warn!(count = ids.len(), error = %e, "probe batch refused");
            let error = e.to_string();
            return ids
                .iter()
                .map(|&id| ProbeResult::failed(id, error.clone()))
                .collect();
        }

        let threshold = self.config.probe.circuit_breaker_threshold;
        let max_attempts = self.config.probe.max_attempts;
        let mut consecutive_failures = 0u32;
        let mut results = Vec::with_capacity(ids.len());

        for (idx, &id) in ids.iter().enumerate() {
            if consecutive_failures >= threshold {
                warn!(
                    consecutive_failures,
                    skipped = ids.len() - idx,
                    "circuit breaker open, skipping remaining probes"
                );
                results.extend(
                    ids[idx..]
                        .iter()
                        .map(|&id| ProbeResult::failed(id, CIRCUIT_BREAKER_OPEN)),
                );
                break;
            }

            let result = self.probe_with_retry(id, remote, max_attempts).await;
            if result.is_error() {
                consecutive_failures += 1;
            } else {
                consecutive_failures = 0;
            }
            let flow = on_result(&result);
            results.push(result);
            if flow.is_break() {
                debug!(id, "probe batch stopped early");
                break;
            }
        }
        results
    }

    /// `min(base * 2^(attempt-1), max)`.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let probe = &self.config.probe;
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 2u64.saturating_pow(exponent);
        Duration::from_millis(probe.base_delay_ms.saturating_mul(factor).min(probe.max_delay_ms))
    }

    /// One remote call, with its outcome folded into the probe stats.
    async fn attempt_probe(
        &self,
        id: i64,
        remote: &dyn RemoteCall,
    ) -> Result<Option<NewForm>, RemoteError> {
        let endpoint = form_endpoint(id);
        let id_key = id.to_string();
        let outcome = match remote.get(&endpoint).await {
            Ok(body) => NewForm::from_remote(&body, Some(&id_key))
                .map(Some)
                .map_err(|e| RemoteError::MalformedResponse {
                    endpoint: endpoint.clone(),
                    detail: e.to_string(),
                }),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        };
        self.record_attempt(id, &outcome);
        outcome
    }

    fn record_attempt(&self, id: i64, outcome: &Result<Option<NewForm>, RemoteError>) {
        let max_errors = self.config.probe.max_recorded_errors;
        let mut stats = self.lock_stats();
        stats.attempted += 1;
        match outcome {
            Ok(Some(_)) => stats.found += 1,
            Ok(None) => {}
            Err(e) => {
                stats.failed += 1;
                if max_errors > 0 {
                    if stats.errors.len() >= max_errors {
                        stats.errors.pop_front();
                    }
                    stats.errors.push_back(format!("form {id}: {e}"));
                }
            }
        }
    }
}

fn failed_result(id: i64, error: RemoteError) -> ProbeResult {
    let mut result = ProbeResult::failed(id, error.to_string());
    result.cause = Some(error);
    result
}
