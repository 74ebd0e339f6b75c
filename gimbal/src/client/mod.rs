use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::info;
use utilities::{command_executor::CommandExecutor, lazy_tcp::LazyTcpStream, shutdown::Shutdown};

use crate::{
    axis::Axis,
    command_executor::{
        CONNECT_TIMEOUT, MAX_CONNECT_RETRIES,
        gimbal_link::{GimbalLinkHandler, command_sender::GimbalCommandSender},
    },
    communication::commands::{GimbalCommand, Reply},
    config::GimbalConfig,
    error::GimbalError,
    models::{AxisId, GimbalLinkState, StatusReport, TelemetrySnapshot},
};

pub mod remote_axis;
pub mod telemetry;

use remote_axis::RemoteAxis;
use telemetry::{TelemetryMirror, run_telemetry_listener};

/// Connection to a gimbal server: a command channel plus a telemetry
/// subscription with link-loss detection.
pub struct RemoteGimbal {
    sender: GimbalCommandSender,
    mirror: Arc<TelemetryMirror>,
    axes: [Arc<RemoteAxis>; 2],
    executor: JoinHandle<std::io::Result<()>>,
    listener: JoinHandle<()>,
}

impl RemoteGimbal {
    /// Starts both workers. Nothing is connected until first use.
    pub fn connect(config: &GimbalConfig, shutdown: Shutdown) -> Self {
        let network = &config.network;
        let timeout = network.command_timeout();

        let stream = LazyTcpStream::new(
            network.command_addr(),
            MAX_CONNECT_RETRIES,
            timeout,
            timeout,
            CONNECT_TIMEOUT,
        );
        let executor = CommandExecutor::new(GimbalLinkHandler::new(stream));
        let sender = GimbalCommandSender::new(executor.sender(), timeout);
        let executor = executor.spawn();

        let mirror = Arc::new(TelemetryMirror::new());
        let listener = tokio::spawn(run_telemetry_listener(
            network.telemetry_addr(),
            mirror.clone(),
            network.link_loss_threshold(),
            network.telemetry_poll(),
            shutdown,
        ));

        let axis = |id| {
            Arc::new(RemoteAxis::new(
                id,
                config.axis(id).scale(),
                sender.clone(),
                mirror.clone(),
            ))
        };
        let axes = [axis(AxisId::One), axis(AxisId::Two)];

        info!("Gimbal client targeting {}", network.command_addr());

        Self {
            sender,
            mirror,
            axes,
            executor,
            listener,
        }
    }

    pub fn axis(&self, id: AxisId) -> Arc<dyn Axis> {
        self.axes[id.index()].clone()
    }

    pub fn link_state(&self) -> GimbalLinkState {
        self.mirror.link_state()
    }

    pub fn telemetry(&self) -> Option<TelemetrySnapshot> {
        self.mirror.latest()
    }

    /// Sends any command; timeouts come back as `{"error":"timeout"}`.
    pub async fn send(&self, command: &GimbalCommand) -> Reply {
        self.sender.send(command).await
    }

    pub async fn status(&self) -> Result<StatusReport, GimbalError> {
        match self.send(&GimbalCommand::Status).await.into_result()? {
            Reply::Status(status) => Ok(status),
            other => Err(GimbalError::Rejected(format!(
                "unexpected status reply: {:?}",
                other
            ))),
        }
    }

    pub async fn set_laser(&self, on: bool) -> Result<(), GimbalError> {
        self.send(&GimbalCommand::Laser { on }).await.into_result()?;
        Ok(())
    }

    pub async fn spray(&self, duration: Duration) -> Result<(), GimbalError> {
        let command = GimbalCommand::Spray {
            duration_seconds: duration.as_secs_f64(),
        };
        self.send(&command).await.into_result()?;
        Ok(())
    }

    /// Drops the command connection and opens a fresh one right away.
    pub async fn reconnect(&self) -> std::io::Result<()> {
        self.sender.reconnect().await
    }

    pub async fn home(&self) -> Result<(), GimbalError> {
        self.send(&GimbalCommand::Home).await.into_result()?;
        Ok(())
    }

    /// Waits for the telemetry listener, then stops the command executor.
    /// The listener only exits once the shutdown passed to
    /// [`RemoteGimbal::connect`] is triggered.
    pub async fn close(self) {
        let Self {
            sender,
            axes,
            executor,
            listener,
            ..
        } = self;

        let _ = listener.await;
        drop(axes);
        drop(sender);
        let _ = executor.await;
    }
}
