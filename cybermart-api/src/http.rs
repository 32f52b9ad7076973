//! HTTP client wrapper
//!
//! Every request goes to one base URL. Immediately before a request is sent the
//! persisted token is read from storage and attached as a bearer credential; with no
//! token persisted no `Authorization` header is set. Responses are not retried,
//! refreshed or unwrapped beyond JSON decoding.

use crate::operations::ApiRequest;
use cybermart_core::{ApiConfig, ErrorContext, KeyValueStore, StoreError, StoreResult};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Wrapper around one `reqwest::Client` bound to the storefront API
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    store: Arc<dyn KeyValueStore>,
    token_key: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("token_key", &self.token_key)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a wrapper reading the token from `store` under `token_key`
    pub fn new(
        config: &ApiConfig,
        store: Arc<dyn KeyValueStore>,
        token_key: impl Into<String>,
    ) -> StoreResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
                StoreError::Config {
                    message: format!("Invalid user agent: {}", e),
                    source: Some(Box::new(e)),
                    context: ErrorContext::new("http_client").with_operation("create_client"),
                }
            })?,
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(seconds) = config.timeout_seconds {
            builder = builder.timeout(std::time::Duration::from_secs(seconds));
        }

        let client = builder.build().map_err(|e| StoreError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?;

        debug!("Created HTTP client for {}", config.base_url);

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            store,
            token_key: token_key.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of a path relative to the base
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build the outgoing request, attaching the currently persisted token
    pub fn prepare(&self, request: &ApiRequest) -> StoreResult<reqwest::Request> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        if let Some(token) = self.store.get(&self.token_key)? {
            builder = builder.bearer_auth(token);
        }

        builder.build().map_err(|e| StoreError::Transport {
            message: format!("Failed to build request for {}: {}", request.path, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client")
                .with_operation("prepare")
                .with_metadata("path", &request.path),
        })
    }

    /// Send a request and decode the JSON body of a 2xx response
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> StoreResult<T> {
        let prepared = self.prepare(&request)?;

        debug!(
            method = %request.method,
            path = %request.path,
            authorized = prepared.headers().contains_key(reqwest::header::AUTHORIZATION),
            "Sending API request"
        );

        let response = self.client.execute(prepared).await.map_err(|e| {
            StoreError::Transport {
                message: format!("Failed to reach {}: {}", self.base_url, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client")
                    .with_operation("send")
                    .with_metadata("path", &request.path)
                    .with_suggestion("Check that the API server is running and reachable"),
            }
        })?;

        let status = response.status();
        debug!(path = %request.path, status = status.as_u16(), "Received API response");

        if !status.is_success() {
            return Err(response_error(response, &request).await);
        }

        let bytes = response.bytes().await.map_err(|e| StoreError::Transport {
            message: format!("Failed to read response body: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client")
                .with_operation("read_body")
                .with_metadata("path", &request.path),
        })?;

        decode_body(&bytes, &request.path)
    }
}

/// Decode a success body; an empty body decodes as JSON `null`
pub(crate) fn decode_body<T: DeserializeOwned>(bytes: &[u8], path: &str) -> StoreResult<T> {
    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        bytes
    };

    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
        message: format!("Unexpected response body for {}: {}", path, e),
        source: Some(Box::new(e)),
        context: ErrorContext::new("http_client")
            .with_operation("decode_body")
            .with_metadata("path", path),
    })
}

/// Pull the human-readable message out of an error body
pub(crate) fn server_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "error"] {
            if let Some(message) = value.get(field).and_then(|m| m.as_str()) {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

async fn response_error(response: reqwest::Response, request: &ApiRequest) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    StoreError::Server {
        status: status.as_u16(),
        message: server_message(&body, status),
        context: ErrorContext::new("http_client")
            .with_operation("send")
            .with_metadata("method", request.method.as_str())
            .with_metadata("path", &request.path)
            .with_suggestion(match status.as_u16() {
                401 => "Log in again; the token was not accepted",
                403 => "This operation requires an admin account",
                404 => "The requested resource does not exist",
                _ => "Check the request and the API server logs",
            }),
    }
}
