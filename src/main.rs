//! Dynamic edge router.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                     EDGE ROUTER                       │
//!                      │                                                       │
//!   Providers ─────────┼─▶ reload (throttle per provider → merge) ──┐          │
//!   (file, ...)        │                                           ▼          │
//!                      │                          routing builder (rebuild)   │
//!                      │                                           │ swap     │
//!   Client Request     │  ┌────────────┐    ┌──────────────┐       ▼          │
//!   ───────────────────┼─▶│ entry point│───▶│ route table  │──▶ middleware    │
//!                      │  │ (net/http) │    │ (rule match) │     chain        │
//!                      │  └────────────┘    └──────────────┘       │          │
//!                      │                                           ▼          │
//!   Client Response    │                         ┌──────────────────────────┐ │
//!   ◀──────────────────┼─────────────────────────│ retry → breaker → limits │─┼──▶ Backend
//!                      │                         │ → forwarder (pool pick)  │ │    servers
//!                      │                         └──────────────────────────┘ │
//!                      │  health checks · metrics · logging · lifecycle        │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use edge_router::config::{load_layered, Overrides};
use edge_router::lifecycle::startup;
use edge_router::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "edge-router")]
#[command(about = "Dynamic reverse proxy with hot-reloaded routing", long_about = None)]
struct Cli {
    /// Static configuration file (TOML).
    #[arg(short, long, env = "EDGE_ROUTER_CONFIG")]
    config: Option<PathBuf>,

    /// Address of the first entry point.
    #[arg(long, env = "EDGE_ROUTER_ADDRESS")]
    address: Option<String>,

    /// Log level.
    #[arg(long, env = "EDGE_ROUTER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Grace period for in-flight requests on shutdown (e.g. "10s").
    #[arg(long, env = "EDGE_ROUTER_GRACE_TIMEOUT")]
    grace_timeout: Option<String>,

    /// Minimum delay between reloads of one provider (e.g. "2s").
    #[arg(long, env = "EDGE_ROUTER_THROTTLE")]
    throttle: Option<String>,

    /// Dynamic configuration file for the file provider.
    #[arg(long, env = "EDGE_ROUTER_PROVIDER_FILE")]
    provider_file: Option<PathBuf>,

    /// Enable the Prometheus exporter.
    #[arg(long, env = "EDGE_ROUTER_METRICS")]
    metrics: Option<bool>,

    /// Prometheus exporter address.
    #[arg(long, env = "EDGE_ROUTER_METRICS_ADDRESS")]
    metrics_address: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            entry_point_address: self.address.clone(),
            log_level: self.log_level.clone(),
            grace_timeout: self.grace_timeout.clone(),
            throttle_duration: self.throttle.clone(),
            provider_file: self.provider_file.clone(),
            metrics_enabled: self.metrics,
            metrics_address: self.metrics_address.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_layered(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("edge-router: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&config.log);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-router starting");

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
