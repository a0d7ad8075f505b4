//! Configuration for the relay.
//!
//! The configuration is built once at start-up and shared read-only by every
//! request: the origin allow-list, the upstream URL and the cookie name never
//! change while the process runs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};

/// Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Upstream endpoint settings.
    pub upstream: UpstreamSettings,
    /// Cross-origin settings.
    pub cors: CorsSettings,
    /// Session cookie settings.
    pub session: SessionSettings,
    /// Admin credential settings.
    pub auth: AuthSettings,
    /// Logging and metrics settings.
    pub telemetry: TelemetrySettings,
}

impl RelayConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Load configuration from a `.toml` or `.json` file.
    pub fn from_file(path: impl Into<PathBuf>) -> RelayResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RelayError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => {
                toml::from_str(&content).map_err(|e| RelayError::config(format!("invalid TOML: {e}")))
            }
            "json" => serde_json::from_str(&content)
                .map_err(|e| RelayError::config(format!("invalid JSON: {e}"))),
            _ => Err(RelayError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Variables are prefixed with `SHEET_RELAY_`. Unparsable values are ignored.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(port) = lookup("SHEET_RELAY_LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                self.server.listen_port = port;
            }
        }

        if let Some(url) = lookup("SHEET_RELAY_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }

        if let Some(timeout) = lookup("SHEET_RELAY_UPSTREAM_TIMEOUT") {
            if let Ok(timeout) = humantime_serde::parse_duration(&timeout) {
                self.upstream.timeout = timeout;
            }
        }

        if let Some(origins) = lookup("SHEET_RELAY_ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(secret) = lookup("SHEET_RELAY_SESSION_SECRET") {
            self.session.secret = Some(secret).filter(|s| !s.is_empty());
        }

        if let Some(level) = lookup("SHEET_RELAY_LOG_LEVEL") {
            self.telemetry.log_level = level;
        }

        if let Some(addr) = lookup("SHEET_RELAY_METRICS_ADDR") {
            self.telemetry.metrics_addr = Some(addr).filter(|a| !a.is_empty());
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RelayResult<()> {
        let url = &self.upstream.base_url;
        if url.is_empty() {
            return Err(RelayError::config("upstream.base_url is required"));
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(RelayError::config(
                "upstream.base_url must start with http:// or https://",
            ));
        }

        if self.cors.allowed_origins.iter().any(|o| o == "*") {
            return Err(RelayError::config(
                "cors.allowed_origins must list explicit origins; use fallback_origin for the wildcard",
            ));
        }

        if self.session.cookie_name.is_empty()
            || self
                .session
                .cookie_name
                .contains(|c: char| c == '=' || c == ';' || c.is_whitespace())
        {
            return Err(RelayError::config("session.cookie_name is not a valid cookie name"));
        }

        if self.session.max_age == 0 {
            return Err(RelayError::config("session.max_age must be positive"));
        }

        Ok(())
    }
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port to listen on.
    pub listen_port: u16,
    /// Maximum inbound request body size in bytes.
    pub max_request_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8787,
            max_request_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Upstream endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// The single fixed upstream URL (the spreadsheet web app endpoint).
    pub base_url: String,
    /// Bound on each upstream call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Cross-origin settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSettings {
    /// Frontend origins allowed to make credentialed calls.
    pub allowed_origins: Vec<String>,
    /// Origin emitted for callers outside the allow-list. `None` emits `*`.
    pub fallback_origin: Option<String>,
    /// Methods advertised on preflight.
    pub allow_methods: String,
    /// Request headers advertised on preflight.
    pub allow_headers: String,
    /// Preflight cache lifetime in seconds.
    pub max_age: u64,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            fallback_origin: None,
            allow_methods: "GET,POST,OPTIONS".to_string(),
            allow_headers: "content-type".to_string(),
            max_age: 86400,
        }
    }
}

/// Session cookie settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Cookie name.
    pub cookie_name: String,
    /// Cookie lifetime in seconds.
    pub max_age: u64,
    /// Signing key. When present, tokens carry an HMAC over the role.
    pub secret: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "__Host-sheet_sess".to_string(),
            max_age: 60 * 60 * 8,
            secret: None,
        }
    }
}

/// Admin credential settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Admin user name, compared case-insensitively.
    pub admin_username: String,
    /// Required password. `None` accepts any non-empty password.
    pub admin_password: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
            admin_password: None,
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log filter directive.
    pub log_level: String,
    /// Emit JSON log lines.
    pub json_logs: bool,
    /// Prometheus listener address; metrics are off when absent.
    pub metrics_addr: Option<String>,
    /// Service name for logs.
    pub service_name: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_addr: None,
            service_name: "sheet-relay".to_string(),
        }
    }
}

/// Builder for `RelayConfig`.
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen_addr = addr.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    /// Set the inbound body limit.
    #[must_use]
    pub fn max_request_body_size(mut self, bytes: usize) -> Self {
        self.config.server.max_request_body_size = bytes;
        self
    }

    /// Set the upstream URL.
    #[must_use]
    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream.base_url = url.into();
        self
    }

    /// Set the upstream timeout.
    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream.timeout = timeout;
        self
    }

    /// Add an allowed origin.
    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.cors.allowed_origins.push(origin.into());
        self
    }

    /// Set the origin emitted for unlisted callers.
    #[must_use]
    pub fn fallback_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.cors.fallback_origin = Some(origin.into());
        self
    }

    /// Set the session cookie name.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.config.session.cookie_name = name.into();
        self
    }

    /// Sign session tokens with the given secret.
    #[must_use]
    pub fn session_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.session.secret = Some(secret.into());
        self
    }

    /// Require an exact admin password.
    #[must_use]
    pub fn admin_password(mut self, password: impl Into<String>) -> Self {
        self.config.auth.admin_password = Some(password.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RelayResult<RelayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Duration (de)serialization using `30s` / `500ms` / `5m` / `1h` strings.
mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        let s = if millis % 1000 == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{millis}ms")
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |n: &str| -> Result<u64, String> {
            n.trim()
                .parse()
                .map_err(|_| format!("invalid duration: {s}"))
        };
        let scaled = |n: u64, unit: u64| -> Result<Duration, String> {
            n.checked_mul(unit)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("invalid duration: {s}"))
        };

        if let Some(stripped) = s.strip_suffix("ms") {
            Ok(Duration::from_millis(number(stripped)?))
        } else if let Some(stripped) = s.strip_suffix('s') {
            Ok(Duration::from_secs(number(stripped)?))
        } else if let Some(stripped) = s.strip_suffix('m') {
            scaled(number(stripped)?, 60)
        } else if let Some(stripped) = s.strip_suffix('h') {
            scaled(number(stripped)?, 3600)
        } else {
            // Bare numbers are seconds
            Ok(Duration::from_secs(number(s)?))
        }
    }
}
