//! HTTP implementation of [`RemoteCall`] for the forms REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::RemoteCall;
use crate::config::ApiConfig;
use crate::errors::{ConfigError, RemoteError};

/// Asynchronous forms API client using HTTP basic auth.
#[derive(Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Build a client from resolved API configuration.
    pub fn new(config: &ApiConfig) -> Result<Self, ConfigError> {
        let consumer_key = config
            .consumer_key
            .clone()
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: config.consumer_key_env.clone(),
                field: "api.consumer_key_env".into(),
            })?;
        let consumer_secret =
            config
                .consumer_secret
                .clone()
                .ok_or_else(|| ConfigError::EnvVarMissing {
                    var: config.consumer_secret_env.clone(),
                    field: "api.consumer_secret_env".into(),
                })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("formcache/", env!("CARGO_PKG_VERSION"))),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "api".into(),
                detail: format!("failed to build HTTP client: {e}"),
            })?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        info!(base_url = %base_url, "created HttpRemote");
        Ok(Self {
            http,
            base_url,
            consumer_key,
            consumer_secret,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteCall for HttpRemote {
    #[instrument(skip(self, body), fields(method = %method))]
    async fn call(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        let mut req = self
            .http
            .request(method, self.url(endpoint))
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret));
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(endpoint, status, body));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| transport_error(endpoint, e))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| RemoteError::MalformedResponse {
                endpoint: endpoint.to_string(),
                detail: e.to_string(),
            })?;
        debug!(status = status.as_u16(), "remote call succeeded");
        Ok(value)
    }
}

/// Classify a non-success HTTP status.
fn status_error(endpoint: &str, status: StatusCode, body: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(endpoint, status = status.as_u16(), "remote rejected credentials");
            RemoteError::Auth {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }
        }
        StatusCode::NOT_FOUND => RemoteError::NotFound {
            endpoint: endpoint.to_string(),
        },
        _ => RemoteError::Http {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: truncate(&body, 512),
        },
    }
}

/// Classify a reqwest transport failure.
fn transport_error(endpoint: &str, err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else if err.is_connect() || err.is_request() {
        RemoteError::Connection {
            endpoint: endpoint.to_string(),
            detail: err.to_string(),
        }
    } else if err.is_decode() || err.is_body() {
        RemoteError::MalformedResponse {
            endpoint: endpoint.to_string(),
            detail: err.to_string(),
        }
    } else {
        RemoteError::Transport(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
