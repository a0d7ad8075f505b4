//! Sheet Relay - Entry point

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use sheet_relay::{RelayConfig, RelayServer};
use sheet_relay_telemetry::{init_logging, init_metrics, LogConfig, MetricsConfig};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("sheet-relay {}", sheet_relay::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Sheet Relay - CORS, session and JSON front for a spreadsheet web app

USAGE:
    sheet-relay [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    SHEET_RELAY_LISTEN_PORT       Listen port (default: 8787)
    SHEET_RELAY_UPSTREAM_URL      Upstream web app URL (required)
    SHEET_RELAY_UPSTREAM_TIMEOUT  Upstream call timeout, e.g. 30s or 500ms (default: 30s)
    SHEET_RELAY_ALLOWED_ORIGINS   Comma-separated frontend origins
    SHEET_RELAY_SESSION_SECRET    Key used to sign session cookies
    SHEET_RELAY_LOG_LEVEL         Log filter (default: info; RUST_LOG wins)
    SHEET_RELAY_METRICS_ADDR      Prometheus listener, e.g. 0.0.0.0:9090 (default: off)

EXAMPLES:
    # Run with configuration file
    sheet-relay --config /etc/sheet-relay/relay.toml

    # Run with environment variables
    SHEET_RELAY_UPSTREAM_URL=https://script.google.com/macros/s/XYZ/exec sheet-relay
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => RelayConfig::default(),
    }
    .with_env_overrides();

    config.validate().context("invalid configuration")?;

    let telemetry = &config.telemetry;
    init_logging(
        &LogConfig::default()
            .with_level(&telemetry.log_level)
            .with_json(telemetry.json_logs),
    )
    .context("failed to initialize logging")?;

    if let Some(addr) = &telemetry.metrics_addr {
        init_metrics(&MetricsConfig { addr: addr.clone() })
            .context("failed to initialize metrics")?;
        info!(%addr, "metrics exporter listening");
    }

    info!(
        service = %telemetry.service_name,
        version = sheet_relay::VERSION,
        config = ?args.config,
        "starting sheet-relay"
    );

    RelayServer::new(config)
        .context("failed to create server")?
        .run()
        .await
        .context("server error")?;

    Ok(())
}
