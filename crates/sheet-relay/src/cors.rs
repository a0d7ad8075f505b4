//! Origin policy.
//!
//! Decides, per request, which `Access-Control-Allow-Origin` value to emit and
//! whether credentialed responses are allowed. Only allow-listed origins get
//! credentials; everybody else gets the fallback origin (wildcard by default)
//! without `Access-Control-Allow-Credentials`, since browsers reject `*`
//! combined with credentials.

use std::collections::HashSet;

use http::header::{HeaderMap, HeaderValue, VARY};

use crate::config::CorsSettings;

/// CORS header names.
pub mod headers {
    /// `Access-Control-Allow-Origin` header.
    pub const ALLOW_ORIGIN: &str = "access-control-allow-origin";
    /// `Access-Control-Allow-Methods` header.
    pub const ALLOW_METHODS: &str = "access-control-allow-methods";
    /// `Access-Control-Allow-Headers` header.
    pub const ALLOW_HEADERS: &str = "access-control-allow-headers";
    /// `Access-Control-Allow-Credentials` header.
    pub const ALLOW_CREDENTIALS: &str = "access-control-allow-credentials";
    /// `Access-Control-Max-Age` header.
    pub const MAX_AGE: &str = "access-control-max-age";
}

const WILDCARD: &str = "*";

/// Allow-list based origin policy.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: HashSet<String>,
    fallback: String,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
}

impl OriginPolicy {
    /// Build the policy from configuration.
    pub fn new(settings: &CorsSettings) -> Self {
        let fallback = settings
            .fallback_origin
            .clone()
            .filter(|o| HeaderValue::from_str(o).is_ok())
            .unwrap_or_else(|| WILDCARD.to_string());

        Self {
            allowed: settings
                .allowed_origins
                .iter()
                .map(|o| o.trim_end_matches('/').to_string())
                .collect(),
            fallback,
            allow_methods: HeaderValue::from_str(&settings.allow_methods)
                .unwrap_or_else(|_| HeaderValue::from_static("GET,POST,OPTIONS")),
            allow_headers: HeaderValue::from_str(&settings.allow_headers)
                .unwrap_or_else(|_| HeaderValue::from_static("content-type")),
            max_age: HeaderValue::from(settings.max_age),
        }
    }

    /// Checks if an origin is on the allow-list.
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed.contains(origin)
    }

    /// Decide the CORS answer for a caller-supplied `Origin` header.
    pub fn decide(&self, origin: Option<&str>) -> CorsDecision {
        match origin {
            Some(origin) if self.is_allowed(origin) => CorsDecision {
                allowed_origin: origin.to_string(),
                credentialed: true,
            },
            _ => CorsDecision {
                allowed_origin: self.fallback.clone(),
                credentialed: false,
            },
        }
    }

    /// Headers for a preflight answer.
    pub fn preflight_headers(&self, decision: &CorsDecision) -> HeaderMap {
        let mut map = HeaderMap::new();
        decision.apply(&mut map);
        map.insert(headers::ALLOW_METHODS, self.allow_methods.clone());
        map.insert(headers::ALLOW_HEADERS, self.allow_headers.clone());
        map.insert(headers::MAX_AGE, self.max_age.clone());
        map
    }
}

/// Per-request CORS outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsDecision {
    /// Value for `Access-Control-Allow-Origin`.
    pub allowed_origin: String,
    /// Whether `Access-Control-Allow-Credentials: true` is emitted.
    pub credentialed: bool,
}

impl CorsDecision {
    /// Write the decision onto a response header map.
    pub fn apply(&self, map: &mut HeaderMap) {
        let origin = HeaderValue::from_str(&self.allowed_origin)
            .unwrap_or_else(|_| HeaderValue::from_static(WILDCARD));
        let wildcard = origin == WILDCARD;

        map.insert(headers::ALLOW_ORIGIN, origin);
        map.append(VARY, HeaderValue::from_static("Origin"));

        // Never pair credentials with the wildcard.
        if self.credentialed && !wildcard {
            map.insert(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        } else {
            map.remove(headers::ALLOW_CREDENTIALS);
        }
    }
}
