//! Simple test server.
//!
//! Runs exactly one protocol backend, picked by `TYPE`, on the address given
//! by `ADDRESS` (or the protocol's default).
//!
//! # Architecture Overview
//!
//! ```text
//!   CLI / env / TOML ──▶ config ──▶ lifecycle::startup
//!                                        │
//!                                        ▼
//!                              backend::BackendRegistry
//!                                        │ resolve(TYPE)
//!                                        ▼
//!                          BackendAdapter<Engine>  (ServiceLifecycle)
//!                                        │ start()
//!                                        ▼
//!                         net::Listener ──▶ accept loop ──▶ session tasks
//!                                        ▲
//!          SIGINT / SIGTERM ─────────────┘ stop()
//! ```

use std::path::PathBuf;

use clap::Parser;

use simple_test_server::config::{load_config, ConfigOverrides};
use simple_test_server::lifecycle::startup;
use simple_test_server::observability::logging;

#[derive(Parser)]
#[command(name = "simple-test-server")]
#[command(about = "Single-protocol test server (ftp, http, ssh, smtp, smb, mqtt)", long_about = None)]
struct Cli {
    /// Optional TOML config file
    #[arg(short, long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Backend type tag
    #[arg(short = 't', long = "type", env = "TYPE")]
    server_type: Option<String>,

    /// Bind address as host:port or host
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(
        cli.config.as_deref(),
        ConfigOverrides {
            server_type: cli.server_type,
            address: cli.address,
            log_level: cli.log_level,
        },
    )?;

    logging::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server_type = %config.server_type,
        "simple-test-server starting"
    );

    if let Err(e) = startup::run(config).await {
        tracing::error!(error = %e, "Server failed");
        return Err(e.into());
    }
    Ok(())
}
