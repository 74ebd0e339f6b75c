use std::{net::SocketAddr, sync::Arc, thread, time::Duration};

use accel_stepper::Clock;
use anyhow::{Context as _, Result, anyhow};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info, warn};
use utilities::{command_executor::CommandExecutor, shutdown::Shutdown};

use crate::{
    command_executor::accessory::{AccessoryHandler, command_sender::AccessoryCommandSender},
    communication::{
        service::{CommandService, run_command_server},
        telemetry::{run_telemetry_server, telemetry_channel},
    },
    config::GimbalConfig,
    context::SharedContext,
    controller::{
        axis_controller::AxisController,
        motion_loop::{AxisLimits, MotionAxis, MotionLoop},
    },
    hardware::{DigitalInput, Hardware, StepEmitter},
    models::AxisId,
    state_monitor::StateMonitor,
};

/// Everything that runs on the gimbal side: motion thread, accessory worker,
/// state monitor and both TCP servers.
pub struct GimbalServer {
    context: Arc<SharedContext>,
    command_addr: SocketAddr,
    telemetry_addr: SocketAddr,
    accessories: AccessoryCommandSender,
    motion: thread::JoinHandle<()>,
    accessory_worker: JoinHandle<std::io::Result<()>>,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl GimbalServer {
    /// Binds both listeners and starts every worker. Homing begins
    /// immediately on the motion thread.
    pub async fn start(
        config: &GimbalConfig,
        hardware: Hardware,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let network = &config.network;
        let max_spray = Duration::try_from_secs_f64(config.accessories.max_spray_seconds)
            .context("Invalid accessories.max_spray_seconds")?;

        let command_listener = TcpListener::bind(network.command_bind_addr())
            .await
            .with_context(|| format!("Failed to bind {}", network.command_bind_addr()))?;
        let telemetry_listener = TcpListener::bind(network.telemetry_bind_addr())
            .await
            .with_context(|| format!("Failed to bind {}", network.telemetry_bind_addr()))?;
        let command_addr = command_listener.local_addr()?;
        let telemetry_addr = telemetry_listener.local_addr()?;

        let Hardware {
            steppers,
            sensors,
            laser,
            water_gun,
            fan,
        } = hardware;

        let context = Arc::new(SharedContext::new(
            [config.axis1.scale(), config.axis2.scale()],
            sensors.clone(),
            shutdown.clone(),
        ));

        let executor = CommandExecutor::new(AccessoryHandler::new(
            laser,
            water_gun,
            fan,
            context.accessories().clone(),
        ));
        let accessories = AccessoryCommandSender::new(executor.sender());
        let accessory_worker = executor.spawn();

        let [stepper1, stepper2] = steppers;
        let [sensor1, sensor2] = sensors;
        let motion_axis = |id: AxisId,
                           stepper: Box<dyn StepEmitter>,
                           sensor: Arc<dyn DigitalInput>| {
            let axis = config.axis(id);
            MotionAxis {
                controller: AxisController::new(
                    id,
                    stepper,
                    clock.clone(),
                    axis.max_speed,
                    axis.acceleration,
                ),
                sensor,
                homing: config.homing.settings_for(axis),
                limits: AxisLimits {
                    max_speed: axis.max_speed,
                    acceleration: axis.acceleration,
                },
            }
        };
        let axes = [
            motion_axis(AxisId::One, stepper1, sensor1),
            motion_axis(AxisId::Two, stepper2, sensor2),
        ];
        let motion = MotionLoop::new(axes, context.clone(), config.motion.loop_period())
            .spawn()
            .context("Failed to spawn motion loop")?;

        let (telemetry_tx, telemetry_rx) = telemetry_channel();
        let monitor = StateMonitor::new(
            context.clone(),
            accessories.clone(),
            telemetry_tx,
            &config.accessories,
        );

        let service = Arc::new(CommandService::new(
            context.clone(),
            accessories.clone(),
            max_spray,
        ));

        let tasks = vec![
            (
                "state monitor",
                tokio::spawn(monitor.run(network.telemetry_period())),
            ),
            (
                "command server",
                tokio::spawn(run_command_server(
                    command_listener,
                    service,
                    network.command_timeout(),
                    shutdown.clone(),
                )),
            ),
            (
                "telemetry server",
                tokio::spawn(run_telemetry_server(
                    telemetry_listener,
                    telemetry_rx,
                    network.command_timeout(),
                    shutdown,
                )),
            ),
        ];

        info!(
            "Gimbal server started: commands on {}, telemetry on {}",
            command_addr, telemetry_addr
        );

        Ok(Self {
            context,
            command_addr,
            telemetry_addr,
            accessories,
            motion,
            accessory_worker,
            tasks,
        })
    }

    pub fn context(&self) -> &Arc<SharedContext> {
        &self.context
    }

    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn telemetry_addr(&self) -> SocketAddr {
        self.telemetry_addr
    }

    /// Waits for every worker to stop. Returns once shutdown has been
    /// triggered and everything has wound down, with all outputs off.
    pub async fn join(self) -> Result<()> {
        let Self {
            context,
            accessories,
            motion,
            accessory_worker,
            tasks,
            ..
        } = self;

        let mut failed = false;
        for (name, task) in tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("{} failed: {:#}", name, e);
                    failed = true;
                }
                Err(e) => {
                    error!("{} panicked: {}", name, e);
                    failed = true;
                }
            }
        }

        let motion = tokio::task::spawn_blocking(move || motion.join()).await?;
        if motion.is_err() {
            error!("Motion loop panicked");
            failed = true;
        }

        if let Err(e) = accessories.all_off().await {
            warn!("Failed to switch accessories off: {}", e);
        }
        drop(accessories);
        drop(context);
        accessory_worker.await??;

        info!("Gimbal server stopped");
        if failed {
            Err(anyhow!("Gimbal server stopped with errors"))
        } else {
            Ok(())
        }
    }
}
