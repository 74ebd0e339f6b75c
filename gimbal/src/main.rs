use std::sync::Arc;

use accel_stepper::MonotonicClock;
use anyhow::Context as _;
use gimbal::{config::init_config, hardware, logging, server::GimbalServer};
use tracing::info;
use utilities::shutdown::Shutdown;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {:#}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let _log_guard = logging::init(&config.logging)?;
    info!("Configuration loaded from {}", config_manager.path().display());

    let hardware = hardware::open(&config).context("Failed to open gimbal hardware")?;
    let shutdown = Shutdown::new();
    let server = GimbalServer::start(
        &config,
        hardware,
        Arc::new(MonotonicClock::new()),
        shutdown.clone(),
    )
    .await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutdown requested");
    shutdown.trigger();

    server.join().await
}
