use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use utilities::moving_average::MovingAverage;

use crate::{
    command_executor::accessory::command_sender::AccessoryCommandSender,
    communication::telemetry::TelemetrySender, config::AccessoryConfig, context::SharedContext,
    hardware::thermal,
};

/// Two-threshold fan switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanHysteresis {
    pub on_above: f32,
    pub off_below: f32,
}

impl FanHysteresis {
    /// Desired fan state given the current one. Between the thresholds the
    /// fan keeps its state.
    pub fn decide(&self, fan_on: bool, celsius: f32) -> bool {
        if celsius > self.on_above {
            true
        } else if celsius < self.off_below {
            false
        } else {
            fan_on
        }
    }
}

pub struct StateMonitor {
    context: Arc<SharedContext>,
    accessories: AccessoryCommandSender,
    telemetry: TelemetrySender,
    thermal_zone: PathBuf,
    temperature: MovingAverage,
    fan: FanHysteresis,
    fan_on: bool,
}

impl StateMonitor {
    pub fn new(
        context: Arc<SharedContext>,
        accessories: AccessoryCommandSender,
        telemetry: TelemetrySender,
        config: &AccessoryConfig,
    ) -> Self {
        Self {
            context,
            accessories,
            telemetry,
            thermal_zone: config.thermal_zone.clone(),
            temperature: MovingAverage::new(config.temperature_window),
            fan: FanHysteresis {
                on_above: config.fan_on_celsius,
                off_below: config.fan_off_celsius,
            },
            fan_on: false,
        }
    }

    /// Publishes a snapshot every `period` until shutdown.
    pub async fn run(mut self, period: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.context.shutdown().clone();

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = interval.tick() => self.tick().await,
            }
        }

        debug!("State monitor stopped");
        Ok(())
    }

    async fn tick(&mut self) {
        self.update_temperature().await;
        self.telemetry
            .send_replace(Some(self.context.telemetry_snapshot()));
    }

    async fn update_temperature(&mut self) {
        match thermal::read_celsius(&self.thermal_zone).await {
            Ok(celsius) => self.temperature.add(celsius),
            Err(e) => {
                debug!("No controller temperature: {}", e);
                return;
            }
        }

        let Some(average) = self.temperature.average() else {
            return;
        };
        self.context.set_controller_temp(Some(average));

        let wanted = self.fan.decide(self.fan_on, average);
        if wanted != self.fan_on {
            match self.accessories.set_fan(wanted).await {
                Ok(()) => self.fan_on = wanted,
                Err(e) => warn!("Failed to switch fan: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_executor::accessory::AccessoryHandler,
        communication::telemetry::telemetry_channel,
        hardware::{
            DigitalOutput,
            sim::{FixedInput, SimulatedOutput},
        },
        models::AxisScale,
    };
    use utilities::{command_executor::CommandExecutor, shutdown::Shutdown};

    #[test]
    fn fan_switches_with_hysteresis() {
        let fan = FanHysteresis {
            on_above: 76.0,
            off_below: 72.0,
        };

        assert!(!fan.decide(false, 75.0));
        assert!(fan.decide(false, 76.5));
        assert!(fan.decide(true, 73.0));
        assert!(!fan.decide(true, 71.9));
        assert!(!fan.decide(false, 74.0));
    }

    #[tokio::test]
    async fn publishes_snapshots_and_drives_fan() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("temp");
        std::fs::write(&zone, "80000\n").unwrap();

        let context = Arc::new(SharedContext::new(
            [AxisScale::new(200, 0.25, 0.2); 2],
            [Arc::new(FixedInput(true)), Arc::new(FixedInput(false))],
            Shutdown::new(),
        ));
        let fan = SimulatedOutput::new();
        let executor = CommandExecutor::new(AccessoryHandler::new(
            Box::new(SimulatedOutput::new()),
            Box::new(SimulatedOutput::new()),
            Box::new(fan.clone()),
            context.accessories().clone(),
        ));
        let accessories = AccessoryCommandSender::new(executor.sender());
        let _worker = executor.spawn();

        let (tx, mut rx) = telemetry_channel();
        let config = AccessoryConfig {
            thermal_zone: zone.clone(),
            ..Default::default()
        };
        let monitor = StateMonitor::new(context.clone(), accessories, tx, &config);
        let task = tokio::spawn(monitor.run(Duration::from_millis(10)));

        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().unwrap();
        assert_eq!(snapshot.controller_temp_celsius, Some(80.0));
        assert!(snapshot.sensor1);
        assert!(fan.is_on());

        context.shutdown().trigger();
        task.await.unwrap().unwrap();
    }
}
