//! NATS ⇄ HTTP bridge.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌────────────────────────────────────────────────────┐
//!                        │                      BRIDGE                        │
//!                        │                                                    │
//!     HTTP request       │  ┌─────────┐   ┌─────────┐   ┌──────────────────┐  │
//!     ───────────────────┼─▶│   net   │──▶│  http   │──▶│ routing + chain  │  │
//!                        │  │listener │   │ vhosts  │   │ offload/publish/ │  │
//!                        │  └─────────┘   └────▲────┘   │ request/respond  │  │
//!                        │                     │        └────────┬─────────┘  │
//!                        │                     │                 │            │
//!                        │             ┌───────┴───────┐   ┌─────▼──────┐     │      ┌──────┐
//!                        │             │  subscribe    │◀──│  registry  │◀────┼─────▶│ NATS │
//!                        │             │ (synthetic    │   │ (aliases)  │     │      └──────┘
//!                        │             │  requests)    │   └────────────┘     │
//!                        │             └───────────────┘                      │
//!                        │                                                    │
//!                        │  config · lifecycle · observability (logs/metrics) │
//!                        └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use nats_http_bridge::config::{load_config, TransportKind, DEFAULT_ALIAS};
use nats_http_bridge::lifecycle::{signals, BridgeApp};
use nats_http_bridge::observability::{forward, logging, metrics};
use nats_http_bridge::transport::{MemoryTransport, Transport};

#[derive(Parser, Debug)]
#[command(name = "nats-http-bridge", version, about = "Bridge HTTP requests and NATS messages")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "bridge.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn transport(kind: TransportKind) -> Result<Box<dyn Transport>, Box<dyn std::error::Error>> {
    match kind {
        TransportKind::Memory => Ok(Box::new(MemoryTransport::new())),
        #[cfg(feature = "nats")]
        TransportKind::Nats => Ok(Box::new(nats_http_bridge::transport::nats::NatsTransport::new())),
        #[cfg(not(feature = "nats"))]
        TransportKind::Nats => Err("transport \"nats\" requires building with the `nats` feature".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    if cli.check {
        println!("{}: configuration OK", cli.config.display());
        return Ok(());
    }

    let (writer, backlog) = forward::channel();
    let forwarding = config.observability.log_output.clone();
    logging::init_logging(&config.observability, forwarding.as_ref().map(|_| writer))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        transport = ?config.transport,
        "nats-http-bridge starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let transport = transport(config.transport)?;
    let mut app = BridgeApp::provision(&config, transport.as_ref()).await?;

    if let Some(output) = &forwarding {
        let alias = output.alias.as_deref().unwrap_or(DEFAULT_ALIAS);
        app.forward_logs(backlog, alias, &output.subject)?;
    }

    if let Err(e) = app.start().await {
        tracing::error!(error = %e, "Startup failed");
        app.stop().await;
        return Err(e.into());
    }

    signals::wait_for_signal().await;
    app.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
