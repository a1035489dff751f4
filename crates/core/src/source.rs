//! Where the current form collection comes from.
//!
//! Consumers that need "all forms" pick a [`FormSource`] once and call
//! [`FormSource::load`], instead of branching on cache and remote
//! availability at every call site.

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::FormCache;
use crate::errors::SourceError;
use crate::remote::{parse_form_listing, RemoteCall, FORMS_ENDPOINT};

/// Strategy for resolving the current collection of form resources.
pub enum FormSource<'a> {
    /// A collection supplied by the caller; no I/O.
    Supplied(Vec<Value>),
    /// Every cached record, active and inactive.
    Cached(&'a FormCache),
    /// The remote active-form listing.
    Remote(&'a dyn RemoteCall),
    /// Nothing to resolve from.
    Unavailable,
}

impl<'a> FormSource<'a> {
    /// Prefer a ready cache, else the remote, else unavailable.
    pub fn prefer(cache: Option<&'a FormCache>, remote: Option<&'a dyn RemoteCall>) -> Self {
        match (cache, remote) {
            (Some(cache), _) if cache.is_ready() => Self::Cached(cache),
            (_, Some(remote)) => Self::Remote(remote),
            _ => Self::Unavailable,
        }
    }

    /// Short name for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Supplied(_) => "supplied",
            Self::Cached(_) => "cache",
            Self::Remote(_) => "remote",
            Self::Unavailable => "unavailable",
        }
    }

    /// Resolve the collection as JSON resources.
    pub async fn load(&self) -> Result<Vec<Value>, SourceError> {
        let forms = match self {
            Self::Supplied(forms) => forms.clone(),
            Self::Cached(cache) => cache
                .list_forms(false)?
                .iter()
                .map(|record| record.to_resource())
                .collect(),
            Self::Remote(remote) => {
                let body = remote.get(FORMS_ENDPOINT).await?;
                let listing = parse_form_listing(&body)?;
                for error in &listing.errors {
                    warn!(%error, "skipping malformed form in listing");
                }
                listing.resources
            }
            Self::Unavailable => return Err(SourceError::Unavailable),
        };
        debug!(source = self.kind(), count = forms.len(), "loaded form collection");
        Ok(forms)
    }
}

/// The `title` of a resource, when it is a string.
pub(crate) fn title_of(form: &Value) -> Option<&str> {
    form.get("title").and_then(Value::as_str)
}
