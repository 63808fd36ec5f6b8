use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use peer_session::config::SessionConfig;
use peer_session::metrics::{self, SessionMetrics};
use peer_session::net::driver::run_loopback_room;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Peer Session v{}", env!("CARGO_PKG_VERSION"));

    let config = SessionConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: server_id={}, send_interval={}s, voice={}",
        config.server_id, config.send_interval_secs, config.voice_enabled
    );

    let metrics = Arc::new(SessionMetrics::new());

    // Start metrics server on port 9090 (configurable via METRICS_PORT)
    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9090);

    let metrics_clone = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let clients: usize = std::env::var("DEMO_CLIENTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = run_loopback_room(config, clients, None, metrics) => {
            match result {
                Ok(summary) => info!("Room finished after {} ticks", summary.ticks),
                Err(e) => error!("Room error: {}", e),
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Stopped");
    Ok(())
}
