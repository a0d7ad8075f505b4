//! Cookie-backed session store.
//!
//! The store keeps no server-side state: a session is a single cookie whose
//! value encodes the caller's [`Role`]. Issuing sets the cookie, revoking
//! overwrites it with `Max-Age=0`, and validation reads it back from the
//! `Cookie` header.
//!
//! Without a configured secret the cookie value is the bare role name, which
//! a client can forge. With a secret the value becomes `<role>.<mac>`, where
//! `mac` is an HMAC-SHA1 of the role, and bare role names are rejected.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha1::Sha1;

use crate::config::SessionSettings;

type HmacSha1 = Hmac<Sha1>;

/// Access tier encoded in the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Authenticated reader.
    User,
    /// May update upstream data.
    Admin,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Whether the role may perform mutating operations.
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

/// Builder for a `Set-Cookie` header value.
#[derive(Debug, Clone)]
pub struct SetCookie {
    name: String,
    value: String,
    path: String,
    secure: bool,
    http_only: bool,
    max_age: u64,
}

impl SetCookie {
    /// Create a new Set-Cookie builder with `Path=/`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            max_age: 0,
        }
    }

    /// Set the Path attribute.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the Secure attribute.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `HttpOnly` attribute.
    #[must_use]
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Set the Max-Age attribute in seconds.
    #[must_use]
    pub fn max_age_secs(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    /// Convert to a Set-Cookie header value.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        let mut parts = vec![
            format!("{}={}", self.name, self.value),
            format!("Path={}", self.path),
        ];

        if self.secure {
            parts.push("Secure".to_string());
        }

        if self.http_only {
            parts.push("HttpOnly".to_string());
        }

        parts.push("SameSite=Lax".to_string());
        parts.push(format!("Max-Age={}", self.max_age));

        parts.join("; ")
    }
}

/// Find a cookie value by name in a `Cookie` header.
///
/// The first occurrence wins. Values are split on the first `=` only, so
/// values may themselves contain `=`. A cookie without `=` has an empty value.
pub fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').map(str::trim).find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key.trim() == name).then(|| value.trim().trim_matches('"'))
    })
}

/// Stateless session store over a single cookie.
#[derive(Clone)]
pub struct SessionStore {
    cookie_name: String,
    max_age: u64,
    key: Option<Vec<u8>>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("cookie_name", &self.cookie_name)
            .field("max_age", &self.max_age)
            .field("signed", &self.key.is_some())
            .finish()
    }
}

impl SessionStore {
    /// Build the store from configuration.
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            cookie_name: settings.cookie_name.clone(),
            max_age: settings.max_age,
            key: settings
                .secret
                .as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        }
    }

    /// Whether tokens are signed.
    pub fn is_signed(&self) -> bool {
        self.key.is_some()
    }

    /// `Set-Cookie` directive establishing a session for `role`.
    pub fn issue(&self, role: Role) -> String {
        self.cookie(self.token_for(role), self.max_age)
    }

    /// `Set-Cookie` directive deleting the session cookie.
    pub fn revoke(&self) -> String {
        self.cookie(String::new(), 0)
    }

    /// Role carried by the request's `Cookie` header, if any.
    ///
    /// Absent header, absent cookie, empty value and malformed or
    /// mis-signed tokens all yield `None`.
    pub fn validate(&self, cookie_header: Option<&str>) -> Option<Role> {
        let value = find_cookie(cookie_header?, &self.cookie_name)?;
        if value.is_empty() {
            return None;
        }

        match &self.key {
            None => value.parse().ok(),
            Some(key) => {
                let (role, mac) = value.split_once('.')?;
                let mac = URL_SAFE_NO_PAD.decode(mac).ok()?;
                let mut verifier = HmacSha1::new_from_slice(key).ok()?;
                verifier.update(role.as_bytes());
                verifier.verify_slice(&mac).ok()?;
                role.parse().ok()
            }
        }
    }

    fn token_for(&self, role: Role) -> String {
        match &self.key {
            None => role.as_str().to_string(),
            Some(key) => match HmacSha1::new_from_slice(key) {
                Ok(mut mac) => {
                    mac.update(role.as_str().as_bytes());
                    let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
                    format!("{role}.{tag}")
                }
                // HMAC accepts keys of any length
                Err(_) => String::new(),
            },
        }
    }

    fn cookie(&self, value: String, max_age: u64) -> String {
        SetCookie::new(&self.cookie_name, value)
            .path("/")
            .secure(true)
            .http_only(true)
            .max_age_secs(max_age)
            .to_header_value()
    }
}
