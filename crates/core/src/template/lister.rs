//! Surfacing template forms from a collection, the cache or the remote.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::{is_template, TemplateSummary};
use crate::cache::FormCache;
use crate::errors::TemplateError;
use crate::models::json_id_string;
use crate::remote::RemoteCall;
use crate::source::FormSource;

/// Lists templates, with an optional remote for when no collection is given.
#[derive(Default)]
pub struct TemplateLister {
    remote: Option<Arc<dyn RemoteCall>>,
}

impl TemplateLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(remote: Arc<dyn RemoteCall>) -> Self {
        Self {
            remote: Some(remote),
        }
    }

    /// Templates in `forms` when supplied (no remote call), otherwise from the
    /// remote listing. Fails when neither is available.
    pub async fn list_templates(
        &self,
        forms: Option<Vec<Value>>,
    ) -> Result<Vec<TemplateSummary>, TemplateError> {
        let source = match forms {
            Some(forms) => FormSource::Supplied(forms),
            None => self.remote_source(),
        };
        let forms = source.load().await?;
        Ok(summarize(&forms))
    }

    /// Templates among all cached forms, inactive ones included. A failing
    /// cache falls back to the remote listing when one is configured.
    pub async fn list_cached_templates(
        &self,
        cache: &FormCache,
    ) -> Result<Vec<TemplateSummary>, TemplateError> {
        let forms = match FormSource::Cached(cache).load().await {
            Ok(forms) => forms,
            Err(e) if self.remote.is_some() => {
                warn!(error = %e, "cache unusable for template listing, using remote");
                self.remote_source().load().await?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(summarize(&forms))
    }

    fn remote_source(&self) -> FormSource<'_> {
        match &self.remote {
            Some(remote) => FormSource::Remote(remote.as_ref()),
            None => FormSource::Unavailable,
        }
    }
}

fn summarize(forms: &[Value]) -> Vec<TemplateSummary> {
    let templates: Vec<TemplateSummary> = forms
        .iter()
        .filter(|form| is_template(form))
        .map(summary_of)
        .collect();
    debug!(
        forms = forms.len(),
        templates = templates.len(),
        "filtered templates"
    );
    templates
}

fn summary_of(form: &Value) -> TemplateSummary {
    let text = |key: &str| {
        form.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    TemplateSummary {
        id: json_id_string(form.get("id")),
        name: text("title"),
        description: text("description"),
        field_count: form
            .get("fields")
            .and_then(Value::as_array)
            .map_or(0, Vec::len),
        created_date: text("date_created"),
    }
}
