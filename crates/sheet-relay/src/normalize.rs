//! Response normalization.
//!
//! Upstream answers go through a two-stage decision: a declared JSON content
//! type is trusted and the body relayed byte-for-byte; anything else is
//! parsed as JSON as a fallback, and a body that still fails becomes a `502`
//! carrying a short preview. The frontend therefore only ever sees JSON.

use bytes::Bytes;
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, SET_COOKIE};
use http::{Response, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use sheet_relay_telemetry::metrics::record_upstream_call;
use tracing::warn;

use crate::cors::CorsDecision;
use crate::error::{ErrorBody, RelayError, RelayResult};
use crate::upstream::UpstreamResponse;

/// Maximum number of characters of an upstream body echoed in a preview.
pub const PREVIEW_CHARS: usize = 200;

/// Header carrying the request correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A JSON response ready for the final header pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// JSON body.
    pub body: Bytes,
    /// Optional `Set-Cookie` directive.
    pub set_cookie: Option<String>,
}

impl RelayResponse {
    /// Serialize `value` as the body.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{\"ok\":false}".to_vec());
        Self::raw(status, body)
    }

    /// `200` with `value` as the body.
    pub fn ok(value: serde_json::Value) -> Self {
        Self::json(StatusCode::OK, &value)
    }

    /// Body that is already JSON text.
    pub fn raw(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            set_cookie: None,
        }
    }

    /// Error envelope for `err`.
    pub fn from_error(err: &RelayError) -> Self {
        Self::json(err.status_code(), &ErrorBody::from(err))
    }

    /// Attach a `Set-Cookie` directive.
    #[must_use]
    pub fn with_cookie(mut self, directive: String) -> Self {
        self.set_cookie = Some(directive);
        self
    }
}

/// Normalize a forwarded answer, preserving its status code.
pub fn normalize(response: UpstreamResponse) -> RelayResult<RelayResponse> {
    if response.declares_json() {
        record_upstream_call("ok");
        return Ok(RelayResponse::raw(response.status, response.body));
    }

    if is_json(&response.body) {
        record_upstream_call("coerced");
        return Ok(RelayResponse::raw(response.status, response.body));
    }

    Err(non_json(&response))
}

/// Normalize the answer to an update.
///
/// The spreadsheet backend acknowledges writes with an HTML page, so a
/// successful non-JSON answer becomes `{"ok": true}`.
pub fn normalize_update(response: UpstreamResponse) -> RelayResult<RelayResponse> {
    if response.is_success() && !response.declares_json() && !is_json(&response.body) {
        record_upstream_call("acknowledged");
        return Ok(RelayResponse::ok(serde_json::json!({ "ok": true })));
    }
    normalize(response)
}

fn is_json(body: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(body).is_ok()
}

fn non_json(response: &UpstreamResponse) -> RelayError {
    let preview = preview(&response.body);
    warn!(
        status = response.status.as_u16(),
        content_type = response.content_type.as_deref().unwrap_or(""),
        body_len = response.body.len(),
        preview_len = preview.chars().count(),
        "upstream returned non-JSON content"
    );
    record_upstream_call("non_json");
    RelayError::UpstreamNonJson {
        status: response.status.as_u16(),
        preview,
    }
}

/// First [`PREVIEW_CHARS`] characters of `body`, decoded lossily.
pub fn preview(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(PREVIEW_CHARS).collect()
}

/// Produce the final HTTP response: JSON content type, `no-store`, CORS and
/// correlation headers.
pub fn finalize(
    response: RelayResponse,
    cors: &CorsDecision,
    request_id: &str,
) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(response.body));
    *out.status_mut() = response.status;

    let headers = out.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    cors.apply(headers);

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    if let Some(directive) = response.set_cookie {
        match HeaderValue::from_str(&directive) {
            Ok(value) => {
                headers.insert(SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "dropping unencodable Set-Cookie directive"),
        }
    }

    out
}

/// Empty `204` preflight answer carrying `cors_headers`.
pub fn preflight(cors_headers: http::HeaderMap, request_id: &str) -> Response<Full<Bytes>> {
    let mut out = Response::new(Full::new(Bytes::new()));
    *out.status_mut() = StatusCode::NO_CONTENT;

    let headers = out.headers_mut();
    headers.extend(cors_headers);
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    out
}
