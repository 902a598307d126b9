//! MCP runtime server.
//!
//! # Architecture Overview
//!
//! ```text
//!   stdin/stdout ─┐                ┌──────────────────────────────────────┐
//!                 ├─▶ transport ──▶│ rpc::Router (session/*, workflow/*,  │
//!   HTTP POST /rpc┘   registry     │              server/status)          │
//!                                  └──────────────┬───────────────────────┘
//!                                                 ▼
//!                                          session::SessionStore
//!
//!   lifecycle::Coordinator starts, in order:
//!     [metrics exporter] → [config watcher] → sessions (sweeper) → transport
//!   and stops them in reverse on SIGINT/SIGTERM or end of input.
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use mcp_runtime::config::validation::validate_config;
use mcp_runtime::config::{load_or_default, Overrides};
use mcp_runtime::lifecycle::signals::spawn_signal_listener;
use mcp_runtime::lifecycle::Shutdown;
use mcp_runtime::observability::logging::init_logging;
use mcp_runtime::{Runtime, RuntimeError};

#[derive(Parser, Debug, Default)]
#[command(name = "mcp-runtime", version)]
#[command(about = "Session-aware tool server runtime over stdio or HTTP", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport to serve on (stdio or http)
    #[arg(short, long)]
    transport: Option<String>,

    /// HTTP bind address, e.g. 127.0.0.1:8080
    #[arg(long)]
    http_addr: Option<String>,

    /// Session time-to-live in seconds
    #[arg(long)]
    session_ttl_secs: Option<u64>,

    /// Maximum number of live sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Expose Prometheus metrics
    #[arg(long)]
    metrics: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            transport: self.transport.clone(),
            http_addr: self.http_addr.clone(),
            session_ttl_secs: self.session_ttl_secs,
            max_sessions: self.max_sessions,
            log_level: self.log_level.clone(),
            metrics: self.metrics,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(2);
        }
    };
    let overrides = cli.overrides();
    overrides.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in errors {
            eprintln!("Invalid configuration: {error}");
        }
        return ExitCode::from(2);
    }

    init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = %config.transport.kind,
        session_ttl_secs = config.session.ttl_secs,
        max_sessions = config.session.max_sessions,
        "mcp-runtime starting"
    );

    let runtime = match Runtime::build(config, cli.config.as_deref(), overrides) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to assemble runtime");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    match runtime.run(&shutdown).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(RuntimeError::Shutdown(e)) => {
            tracing::error!(error = %e, "Shutdown completed with errors");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Runtime failed");
            ExitCode::FAILURE
        }
    }
}
