//! Prometheus metrics for the relay.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address the Prometheus scrape endpoint listens on (e.g. "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder and starts its HTTP listener.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for an unparsable address and
/// `TelemetryError::MetricsInit` if the exporter cannot be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    register_metric_descriptions();
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "sheet_relay_requests_total",
        "Total number of requests answered by the relay"
    );
    describe_histogram!(
        "sheet_relay_request_duration_seconds",
        "Request duration in seconds"
    );
    describe_counter!(
        "sheet_relay_upstream_calls_total",
        "Upstream calls by outcome"
    );
    describe_counter!("sheet_relay_logins_total", "Login attempts by result");
}

/// Records a completed request.
///
/// * `route` - Dispatch route label (e.g. "ping", "data", "preflight")
/// * `status_code` - HTTP status returned to the caller
/// * `duration` - Time spent handling the request
pub fn record_request(route: &str, status_code: u16, duration: Duration) {
    counter!(
        "sheet_relay_requests_total",
        "route" => route.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        "sheet_relay_request_duration_seconds",
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records the outcome of an upstream call ("ok", "non_json", "unreachable", ...).
pub fn record_upstream_call(outcome: &str) {
    counter!(
        "sheet_relay_upstream_calls_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Records a login attempt.
pub fn record_login(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("sheet_relay_logins_total", "result" => result).increment(1);
}
