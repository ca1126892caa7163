mod bridge;
mod core;
mod http;
mod socket;

use std::sync::Arc;

use jukebox_core::Jukebox;
use jukebox_proto::config::Config;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::bridge::BridgeClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // File logging plus stderr for foreground runs
    let data_dir = jukebox_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,jukebox_core=debug,jukebox_daemon=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    // Event channel: all external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let bridge = Arc::new(BridgeClient::new());
    let jukebox = Arc::new(Jukebox::new(bridge.clone(), bridge.clone(), &config));
    let daemon_core = core::DaemonCore::new(jukebox.clone());

    let _socket_handle = socket::start_server(
        config.bridge.bind_address.clone(),
        config.bridge.port,
        bridge.clone(),
        event_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            jukebox.clone(),
            bridge.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for interrupt: {}", e);
            return;
        }
        info!("Interrupt received");
        let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
    });

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}
