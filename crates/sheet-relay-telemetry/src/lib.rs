//! Observability setup for `sheet-relay`.
//!
//! - **Logging**: structured JSON (or pretty) output through `tracing-subscriber`
//! - **Metrics**: Prometheus exposition through the `metrics` facade
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `sheet_relay_requests_total` | Counter | `route`, `status` | Requests answered |
//! | `sheet_relay_request_duration_seconds` | Histogram | `route` | Request latency |
//! | `sheet_relay_upstream_calls_total` | Counter | `outcome` | Calls made to the upstream |
//! | `sheet_relay_logins_total` | Counter | `result` | Login attempts |
//!
//! Recording functions are safe to call before (or without) [`init_metrics`];
//! the `metrics` facade drops observations when no recorder is installed.

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
