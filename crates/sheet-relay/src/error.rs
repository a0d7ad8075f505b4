//! Error types for the relay.
//!
//! Every failure that can reach a caller maps to a stable wire code and an
//! HTTP status. The server renders them through [`ErrorBody`], so the
//! frontend always receives `{"ok": false, "error": "<code>"}`.

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Request body could not be parsed as JSON where JSON is mandatory.
    #[error("malformed JSON body")]
    BadJson,

    /// Login rejected.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Missing or insufficient session.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown `op` within `mode=api`.
    #[error("unknown operation: {op}")]
    BadOp {
        /// The operation name the caller asked for.
        op: String,
    },

    /// Unrecognized path or mode.
    #[error("route not found")]
    NotFound,

    /// Known operation called with the wrong HTTP method.
    #[error("method {method} not allowed")]
    MethodNotAllowed {
        /// The offending method.
        method: String,
    },

    /// Inbound body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The upstream call failed before a response arrived (network, timeout).
    #[error("upstream unreachable: {detail}")]
    UpstreamUnreachable {
        /// Captured failure detail.
        detail: String,
    },

    /// The upstream answered with content that is not JSON.
    #[error("upstream returned non-JSON content (status {status})")]
    UpstreamNonJson {
        /// Status code the upstream answered with.
        status: u16,
        /// Leading slice of the raw body.
        preview: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Server startup or accept error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Create an unknown-operation error.
    pub fn bad_op(op: impl Into<String>) -> Self {
        Self::BadOp { op: op.into() }
    }

    /// Create a method-not-allowed error.
    pub fn method_not_allowed(method: &http::Method) -> Self {
        Self::MethodNotAllowed {
            method: method.to_string(),
        }
    }

    /// Create an upstream-unreachable error.
    pub fn upstream_unreachable(detail: impl Into<String>) -> Self {
        Self::UpstreamUnreachable {
            detail: detail.into(),
        }
    }

    /// Wire code carried in the `error` field of the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadJson => "bad_json",
            Self::InvalidCredentials => "invalid_credentials",
            Self::Unauthorized => "unauthorized",
            Self::BadOp { .. } => "bad_op",
            Self::NotFound => "not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::UpstreamUnreachable { .. } => "upstream_unreachable",
            Self::UpstreamNonJson { .. } => "upstream_non_json",
            Self::Config { .. } | Self::Server { .. } | Self::Io(_) => "internal",
        }
    }

    /// Get the HTTP status code for this error.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadJson | Self::BadOp { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamUnreachable { .. } | Self::UpstreamNonJson { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Server { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure originated upstream rather than with the caller.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnreachable { .. } | Self::UpstreamNonJson { .. }
        )
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// JSON error envelope returned to the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Always `false`.
    pub ok: bool,
    /// Wire code.
    pub error: &'static str,
    /// Captured failure detail (upstream failures).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Upstream status code (non-JSON upstream answers).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Leading slice of an unparseable upstream body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl From<&RelayError> for ErrorBody {
    fn from(err: &RelayError) -> Self {
        let mut body = Self {
            ok: false,
            error: err.code(),
            detail: None,
            status: None,
            preview: None,
        };

        match err {
            RelayError::UpstreamUnreachable { detail } => body.detail = Some(detail.clone()),
            RelayError::UpstreamNonJson { status, preview } => {
                body.status = Some(*status);
                body.preview = Some(preview.clone());
            }
            _ => {}
        }

        body
    }
}
