use std::net::SocketAddr;

use clap::Parser;
use tokio::signal;
use tracing::info;

use gatekeeper::app::Gatekeeper;
use gatekeeper::config::{GatekeeperConfig, LogFormat};
use gatekeeper::http::{build_router, AdmissionLayer, ClientKeyExtractor, HttpServer};
use gatekeeper::telemetry;

/// Dual-tier admission control in front of an HTTP API.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Override the log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }

    telemetry::init(&config.log)?;

    info!("Starting Gatekeeper Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        trust_forwarded_headers = config.server.trust_forwarded_headers,
        key_by_identity = config.server.key_by_identity,
        "Configuration loaded"
    );

    // Initialize the rate limiter
    let gatekeeper = Gatekeeper::from_config(&config.rate_limiting).await?;
    info!(strategy = gatekeeper.decision_point().strategy(), "Rate limiter initialized");

    let extractor = ClientKeyExtractor::new(
        config.server.trust_forwarded_headers,
        config.server.key_by_identity,
    );
    let layer = AdmissionLayer::new(gatekeeper.decision_point().clone(), extractor);
    let http_server = HttpServer::new(config.server.http_addr, build_router(layer));

    // Run the server with graceful shutdown on Ctrl+C
    http_server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Gatekeeper Admission Control Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
