//! Forwarding to the single fixed upstream endpoint.
//!
//! The upstream routes purely on query parameters, so the forwarder always
//! writes `mode` into the outgoing query and copies an `op` that the caller
//! only supplied in the JSON body. Bodies travel verbatim; they are never
//! parsed and re-serialized on the way out.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Method, StatusCode};
use indexmap::IndexMap;
use reqwest::Client;
use sheet_relay_telemetry::metrics::record_upstream_call;
use tracing::{debug, error};

use crate::config::UpstreamSettings;
use crate::error::{RelayError, RelayResult};
use crate::request::{Mode, RequestDescriptor};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Content type used when the caller declared none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Upstream URL plus the query derived from the inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    base_url: String,
    query: IndexMap<String, String>,
}

impl UpstreamTarget {
    /// Derive the target for `request` dispatched under `mode`.
    pub fn new(base_url: impl Into<String>, request: &RequestDescriptor, mode: Mode) -> Self {
        let mut query = request.query.clone();
        query.insert("mode".to_string(), mode.as_str().to_string());

        if let Some(op) = &request.op {
            if !query.get("op").is_some_and(|existing| !existing.is_empty()) {
                query.insert("op".to_string(), op.clone());
            }
        }

        Self {
            base_url: base_url.into(),
            query,
        }
    }

    /// Forwarded query parameters.
    pub fn query(&self) -> &IndexMap<String, String> {
        &self.query
    }

    /// Full upstream URL.
    pub fn url(&self) -> String {
        let encoded = serde_urlencoded::to_string(&self.query).unwrap_or_default();
        if encoded.is_empty() {
            return self.base_url.clone();
        }
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{separator}{encoded}", self.base_url)
    }
}

/// Request to be sent upstream.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// HTTP method.
    pub method: Method,
    /// Destination.
    pub target: UpstreamTarget,
    /// Body for methods that carry one.
    pub body: Option<Bytes>,
    /// Content type accompanying `body`.
    pub content_type: Option<String>,
}

impl UpstreamRequest {
    /// Build an upstream request from the inbound descriptor.
    ///
    /// GET, HEAD and OPTIONS carry no body. Other methods forward
    /// `body_override` if given, otherwise the inbound body verbatim.
    pub fn from_descriptor(
        base_url: &str,
        request: &RequestDescriptor,
        mode: Mode,
        body_override: Option<Bytes>,
    ) -> Self {
        let target = UpstreamTarget::new(base_url, request, mode);
        let method = request.method.clone();

        if matches!(method, Method::GET | Method::HEAD | Method::OPTIONS) {
            return Self {
                method,
                target,
                body: None,
                content_type: None,
            };
        }

        let (body, content_type) = match body_override {
            Some(body) => (body, DEFAULT_CONTENT_TYPE.to_string()),
            None => (
                request.body.clone(),
                request
                    .content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            ),
        };

        Self {
            method,
            target,
            body: Some(body),
            content_type: Some(content_type),
        }
    }
}

/// Response from upstream.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Declared content type.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Bytes,
}

impl UpstreamResponse {
    /// Convenience constructor.
    pub fn new(status: StatusCode, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.map(String::from),
            body: body.into(),
        }
    }

    /// Check if the response indicates success.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the declared content type is JSON (`application/json` or `+json`).
    pub fn declares_json(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            essence == "application/json" || essence.ends_with("+json")
        })
    }
}

/// Transport seam to the upstream.
pub trait Upstream: Send + Sync {
    /// Issue one call. Transport failures map to `UpstreamUnreachable`.
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'_, RelayResult<UpstreamResponse>>;
}

/// `reqwest`-backed upstream.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    timeout: Duration,
}

impl HttpUpstream {
    /// Create a client bounded by the configured timeout.
    pub fn new(settings: &UpstreamSettings) -> RelayResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| RelayError::config(format!("failed to create client: {e}")))?;

        Ok(Self {
            client,
            timeout: settings.timeout,
        })
    }

    async fn call(&self, request: UpstreamRequest) -> RelayResult<UpstreamResponse> {
        let mut builder = self.client.request(request.method, request.target.url());

        if let Some(body) = request.body {
            let content_type = request
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            builder = builder.header(http::header::CONTENT_TYPE, content_type).body(body);
        }

        let response = builder.send().await.map_err(|e| self.describe(&e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response.bytes().await.map_err(|e| self.describe(&e))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }

    fn describe(&self, err: &reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::upstream_unreachable(format!(
                "no response within {}ms",
                self.timeout.as_millis()
            ))
        } else if err.is_connect() {
            RelayError::upstream_unreachable(format!("connection failed: {err}"))
        } else {
            RelayError::upstream_unreachable(err.to_string())
        }
    }
}

impl Upstream for HttpUpstream {
    fn send(&self, request: UpstreamRequest) -> BoxFuture<'_, RelayResult<UpstreamResponse>> {
        Box::pin(self.call(request))
    }
}

/// Issues exactly one upstream call per forwarded request.
#[derive(Clone)]
pub struct Forwarder {
    base_url: String,
    upstream: Arc<dyn Upstream>,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    /// Create a forwarder for `base_url` over `upstream`.
    pub fn new(base_url: impl Into<String>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            base_url: base_url.into(),
            upstream,
        }
    }

    /// Forward `request` under `mode`, optionally replacing the body.
    ///
    /// No retries: a failed call is reported as-is.
    pub async fn forward(
        &self,
        request: &RequestDescriptor,
        mode: Mode,
        body_override: Option<Bytes>,
    ) -> RelayResult<UpstreamResponse> {
        let outgoing = UpstreamRequest::from_descriptor(&self.base_url, request, mode, body_override);
        let method = outgoing.method.clone();
        let start = Instant::now();

        match self.upstream.send(outgoing).await {
            Ok(response) => {
                debug!(
                    %method,
                    %mode,
                    status = response.status.as_u16(),
                    bytes = response.body.len(),
                    duration_ms = %start.elapsed().as_millis(),
                    "upstream responded"
                );
                Ok(response)
            }
            Err(e) => {
                error!(
                    %method,
                    %mode,
                    error = %e,
                    duration_ms = %start.elapsed().as_millis(),
                    "upstream call failed"
                );
                record_upstream_call("unreachable");
                Err(e)
            }
        }
    }
}
