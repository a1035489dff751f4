//! Abstraction over the remote forms API.
//!
//! Everything in this crate talks to the API through [`RemoteCall`], an
//! object-safe async trait from logical endpoint to parsed JSON. The
//! production implementation is [`http::HttpRemote`]; tests plug in scripted
//! fakes.

pub mod http;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::errors::RemoteError;
use crate::models::NewForm;

pub use http::HttpRemote;

/// Logical endpoint listing active forms, keyed by id.
pub const FORMS_ENDPOINT: &str = "/forms";

/// Logical endpoint for a single form.
pub fn form_endpoint(id: i64) -> String {
    format!("{FORMS_ENDPOINT}/{id}")
}

/// A single call against the remote forms API.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError>;

    async fn get(&self, endpoint: &str) -> Result<Value, RemoteError> {
        self.call(endpoint, Method::GET, None).await
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, RemoteError> {
        self.call(endpoint, Method::POST, Some(body)).await
    }
}

/// A parsed `GET /forms` response.
#[derive(Debug, Default)]
pub(crate) struct FormListing {
    pub forms: Vec<NewForm>,
    /// Raw resources in listing order, for consumers that need full objects.
    pub resources: Vec<Value>,
    /// Items that failed validation, as human-readable descriptions.
    pub errors: Vec<String>,
}

/// Parse the id → resource mapping returned by the list endpoint.
///
/// A non-object top level (or a non-array, for servers that return a list)
/// is malformed as a whole; individual bad items are collected in
/// [`FormListing::errors`].
pub(crate) fn parse_form_listing(body: &Value) -> Result<FormListing, RemoteError> {
    let items: Vec<(Option<&str>, &Value)> = match body {
        Value::Object(map) => map.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        Value::Array(list) => list.iter().map(|v| (None, v)).collect(),
        other => {
            return Err(RemoteError::MalformedResponse {
                endpoint: FORMS_ENDPOINT.into(),
                detail: format!("expected an object keyed by form id, got {}", json_kind(other)),
            })
        }
    };

    let mut listing = FormListing::default();
    for (key, value) in items {
        match NewForm::from_remote(value, key) {
            Ok(form) => {
                listing.resources.push(value.clone());
                listing.forms.push(form);
            }
            Err(e) => listing
                .errors
                .push(format!("form {}: {}", key.unwrap_or("?"), e)),
        }
    }
    listing.forms.sort_by_key(|f| f.id);
    Ok(listing)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted in-process remote for unit tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    type Handler = Box<dyn Fn(&Method, &str, Option<&Value>) -> Result<Value, RemoteError> + Send + Sync>;

    /// Serves queued responses per endpoint, then a fallback handler.
    /// Every call is recorded.
    pub struct FakeRemote {
        queued: Mutex<HashMap<String, VecDeque<Result<Value, RemoteError>>>>,
        fallback: Handler,
        calls: Mutex<Vec<(Method, String, Option<Value>)>>,
    }

    impl FakeRemote {
        pub fn new<F>(fallback: F) -> Self
        where
            F: Fn(&Method, &str, Option<&Value>) -> Result<Value, RemoteError> + Send + Sync + 'static,
        {
            Self {
                queued: Mutex::new(HashMap::new()),
                fallback: Box::new(fallback),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Every unscripted endpoint answers 404.
        pub fn not_found() -> Self {
            Self::new(|_, endpoint, _| {
                Err(RemoteError::NotFound {
                    endpoint: endpoint.to_string(),
                })
            })
        }

        pub fn push(&self, endpoint: &str, response: Result<Value, RemoteError>) -> &Self {
            self.queued
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .push_back(response);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls_to(&self, endpoint: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, e, _)| e == endpoint)
                .count()
        }

        pub fn posted_bodies(&self) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _, _)| *m == Method::POST)
                .filter_map(|(_, _, b)| b.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteCall for FakeRemote {
        async fn call(
            &self,
            endpoint: &str,
            method: Method,
            body: Option<&Value>,
        ) -> Result<Value, RemoteError> {
            self.calls
                .lock()
                .unwrap()
                .push((method.clone(), endpoint.to_string(), body.cloned()));
            let queued = self
                .queued
                .lock()
                .unwrap()
                .get_mut(endpoint)
                .and_then(VecDeque::pop_front);
            match queued {
                Some(response) => response,
                None => (self.fallback)(&method, endpoint, body),
            }
        }
    }
}
