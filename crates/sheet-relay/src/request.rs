//! Normalized view of an inbound request.

use std::fmt;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, CONTENT_TYPE, COOKIE, ORIGIN};
use http::Method;
use indexmap::IndexMap;
use serde_json::Value;

/// Top-level operation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Local operations plus the forwarded `update` op.
    Api,
    /// Authenticated read proxy.
    Data,
    /// Admin-only write proxy.
    Update,
}

impl Mode {
    /// Wire name as understood by the upstream router.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Data => "data",
            Self::Update => "update",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "api" => Some(Self::Api),
            "data" => Some(Self::Data),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor built once per inbound request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Resolved mode; `None` when neither the query nor the path name one.
    pub mode: Option<Mode>,
    /// Operation name (query first, then a POST body's `op` field).
    pub op: Option<String>,
    /// HTTP method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Query parameters; keys unique, later duplicates overwrite earlier ones.
    pub query: IndexMap<String, String>,
    /// Raw body, read at most once.
    pub body: Bytes,
    /// Declared body content type.
    pub content_type: Option<String>,
    /// `Origin` header.
    pub origin: Option<String>,
    /// Raw `Cookie` header.
    pub cookie: Option<String>,
}

impl RequestDescriptor {
    /// Build a descriptor from request parts and the already-read body.
    pub fn new(method: Method, path: &str, query: Option<&str>, headers: &HeaderMap, body: Bytes) -> Self {
        let query = parse_query(query.unwrap_or(""));
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };

        let path = if path.is_empty() { "/" } else { path }.to_string();

        let op_in_body = if method == Method::POST {
            body_op(&body)
        } else {
            None
        };

        let op = query
            .get("op")
            .filter(|op| !op.is_empty())
            .cloned()
            .or(op_in_body);

        let mode = match query.get("mode").filter(|m| !m.is_empty()) {
            Some(mode) => Mode::parse(mode),
            None => default_mode(&path, &method, op.is_some()),
        };

        Self {
            mode,
            op,
            method,
            path,
            query,
            body,
            content_type: header(CONTENT_TYPE),
            origin: header(ORIGIN),
            cookie: header(COOKIE),
        }
    }

    /// Whether the path belongs to the relay's `/api` surface.
    pub fn is_api_path(&self) -> bool {
        self.path == "/api" || self.path.starts_with("/api/")
    }

    /// Body parsed as a JSON value, `None` when empty or malformed.
    pub fn json_body(&self) -> Option<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    /// Short route label for logs and metrics.
    pub fn route(&self) -> String {
        match (self.mode, self.op.as_deref()) {
            (Some(Mode::Api), Some(op)) => format!("api.{op}"),
            (Some(mode), _) => mode.as_str().to_string(),
            (None, _) => "unknown".to_string(),
        }
    }
}

/// Parse a raw query string into unique keys, preserving first-seen order.
pub fn parse_query(raw: &str) -> IndexMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(raw)
        .unwrap_or_default()
        .into_iter()
        .collect()
}

fn body_op(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("op")
        .and_then(Value::as_str)
        .filter(|op| !op.is_empty())
        .map(String::from)
}

/// Mode implied by path conventions when the query names none.
fn default_mode(path: &str, method: &Method, has_op: bool) -> Option<Mode> {
    if path == "/api/data" || path.starts_with("/api/data/") {
        Some(Mode::Data)
    } else if path == "/api" && *method == Method::POST && has_op {
        Some(Mode::Api)
    } else {
        None
    }
}
