use std::{sync::Arc, time::Duration};

use accel_stepper::MonotonicClock;
use anyhow::Context as _;
use gimbal::{
    axis::{Axis, LocalAxis},
    client::RemoteGimbal,
    config::{GimbalMode, init_config},
    hardware, logging,
    models::AxisId,
    server::GimbalServer,
};
use tracing::{info, warn};
use utilities::shutdown::Shutdown;

const REPORT_PERIOD: Duration = Duration::from_secs(1);

/// Logs both axes and the link state every second until ctrl-c. In local
/// mode the gimbal is driven in-process, in remote mode over TCP.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (_config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {:#}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;
    let _log_guard = logging::init(&config.logging)?;

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        signal.trigger();
    });

    match config.mode {
        GimbalMode::Local => {
            let hardware = hardware::open(&config).context("Failed to open gimbal hardware")?;
            let server = GimbalServer::start(
                &config,
                hardware,
                Arc::new(MonotonicClock::new()),
                shutdown.clone(),
            )
            .await?;

            let axes: Vec<Arc<dyn Axis>> = AxisId::ALL
                .into_iter()
                .map(|id| Arc::new(LocalAxis::new(id, server.context().clone())) as Arc<dyn Axis>)
                .collect();
            report(&axes, &shutdown).await;

            server.join().await
        }
        GimbalMode::Remote => {
            let gimbal = RemoteGimbal::connect(&config, shutdown.clone());
            if let Err(e) = gimbal.reconnect().await {
                warn!(
                    "Gimbal at {} not reachable yet: {}",
                    config.network.command_addr(),
                    e
                );
            }
            let axes: Vec<Arc<dyn Axis>> =
                AxisId::ALL.into_iter().map(|id| gimbal.axis(id)).collect();
            report(&axes, &shutdown).await;

            gimbal.close().await;
            Ok(())
        }
    }
}

async fn report(axes: &[Arc<dyn Axis>], shutdown: &Shutdown) {
    let mut interval = tokio::time::interval(REPORT_PERIOD);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = interval.tick() => {}
        }

        for axis in axes {
            info!(
                "Axis {}: {:.3} deg ({} steps), link {}",
                axis.id(),
                axis.current_degrees(),
                axis.current_position(),
                axis.link_state()
            );
        }
    }
}
