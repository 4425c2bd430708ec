//! edge-proxy
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!                     │                  EDGE PROXY                   │
//!  Client Request     │  ┌────────┐   ┌──────────┐   ┌────────────┐  │
//!  ───────────────────┼─▶│  http  │──▶│ routing  │──▶│  health    │  │
//!                     │  │ server │   │ registry │   │  board     │  │
//!                     │  └────────┘   └──────────┘   └─────┬──────┘  │
//!                     │                                    │ eligible│
//!  Client Response    │  ┌────────┐                        ▼         │
//!  ◀──────────────────┼──│response│◀──────────── hyper client ◀──────┼──── Upstream
//!                     │  └────────┘                                  │
//!                     │                                              │
//!                     │  ┌──────────────┐  verdict   ┌─────────────┐ │
//!                     │  │ health probers│──flips───▶│ supervisor  │─┼──▶ relaunch
//!                     │  └──────────────┘            └─────────────┘ │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use edge_proxy::config::load_config;
use edge_proxy::lifecycle::{bind, signals, Proxy, Shutdown};
use edge_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "edge-proxy")]
#[command(about = "Health-aware reverse proxy with restart supervision", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edge-proxy.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "edge-proxy starting"
    );

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstreams = config.upstreams.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let listener = bind(&config).await?;
    let proxy = Proxy::build(config)?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    proxy.serve(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
