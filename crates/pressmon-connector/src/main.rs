//! pressmon-connector: Press telemetry ingestion binary
//!
//! Streams telemetry from the press gateway into a rolling buffer and serves
//! it, with health and metrics, over HTTP.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pressmon_connector_lib::{
    ConnectionController, ConnectionStatus, DashboardState, EnvResolver, ServerState,
    WebSocketTransportFactory,
};
use pressmon_metadata::StreamConfig;

#[derive(Parser, Debug)]
#[command(name = "pressmon-connector")]
#[command(about = "Press telemetry connector")]
struct Args {
    /// Path to stream configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the gateway endpoint from the configuration
    #[arg(long, env = "PRESSMON_ENDPOINT")]
    endpoint: Option<String>,

    /// Gateway API key
    #[arg(long, env = "PRESSMON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Health server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if let Some(endpoint) = args.endpoint.clone() {
        config.endpoint = endpoint;
        config.validate()?;
    }

    let (config, clamped) = config.validated();
    if clamped {
        warn!(capacity = config.buffer.capacity, "Buffer capacity out of range, clamped");
    }
    info!(
        stream = %config.name,
        endpoint = %config.endpoint,
        capacity = config.buffer.capacity,
        "Loaded stream configuration"
    );

    let credential = resolve_credential(&args, &config)?;

    // Setup shutdown signal
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    let health_addr: SocketAddr = args.health_addr.parse()?;

    let factory = Arc::new(WebSocketTransportFactory::from_config(&config));
    let mut controller = ConnectionController::new(config, factory);

    let server_state = ServerState::new(&controller.config().name, controller.subscribe());
    tokio::spawn(async move {
        if let Err(e) = pressmon_connector_lib::run_server(health_addr, server_state).await {
            error!(error = %e, "Health server error");
        }
    });
    info!(addr = %health_addr, "Health server started");

    tokio::spawn(log_status_changes(controller.subscribe()));

    controller.start(&credential).await?;

    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    controller.stop().await;
    info!("Connector stopped gracefully");
    Ok(())
}

/// API key from the command line or environment, else from the configured source
fn resolve_credential(
    args: &Args,
    config: &StreamConfig,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(key) = args.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.clone());
    }

    let source = config
        .credential_source
        .as_deref()
        .ok_or("no API key: pass --api-key, set PRESSMON_API_KEY, or configure credential_source")?;

    EnvResolver::new().resolve_single(source).map_err(|e| {
        error!(error = %e, source = %source, "Failed to resolve API key");
        Box::new(e) as Box<dyn std::error::Error>
    })
}

async fn log_status_changes(mut rx: watch::Receiver<DashboardState>) {
    let mut last = ConnectionStatus::Idle;
    while rx.changed().await.is_ok() {
        let (status, last_error) = {
            let state = rx.borrow_and_update();
            (state.status, state.last_error.clone())
        };
        if status == last {
            continue;
        }
        last = status;
        match status {
            ConnectionStatus::Error => {
                error!(status = ?status, error = ?last_error, "Telemetry connection status changed")
            }
            _ => info!(status = ?status, "Telemetry connection status changed"),
        }
    }
}
