use std::{
    io,
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

use commands::AccessoryCommand;
use tracing::{debug, info, warn};
use utilities::command_executor::DeviceHandler;

use crate::{context::AccessoryState, hardware::DigitalOutput};

pub mod command_sender;
pub mod commands;

/// Owns the laser, water gun and fan outputs. Mirrors their state into
/// [`AccessoryState`] so readers never have to go through the executor.
pub struct AccessoryHandler {
    laser: Box<dyn DigitalOutput>,
    water_gun: Box<dyn DigitalOutput>,
    fan: Box<dyn DigitalOutput>,
    state: Arc<AccessoryState>,
    spray_until: Option<Instant>,
}

impl DeviceHandler for AccessoryHandler {
    type Command = AccessoryCommand;

    fn on_idle(&mut self) {
        if self.spray_until.is_some_and(|until| Instant::now() >= until) {
            self.end_spray();
        }
    }
}

impl AccessoryHandler {
    pub fn new(
        laser: Box<dyn DigitalOutput>,
        water_gun: Box<dyn DigitalOutput>,
        fan: Box<dyn DigitalOutput>,
        state: Arc<AccessoryState>,
    ) -> Self {
        Self {
            laser,
            water_gun,
            fan,
            state,
            spray_until: None,
        }
    }

    pub fn set_laser(&mut self, on: bool) -> io::Result<()> {
        self.laser.set(on)?;
        self.state.laser_on.store(on, Ordering::SeqCst);
        info!("Laser {}", if on { "on" } else { "off" });
        Ok(())
    }

    pub fn set_fan(&mut self, on: bool) -> io::Result<()> {
        self.fan.set(on)?;
        self.state.fan_on.store(on, Ordering::SeqCst);
        info!("Fan {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// Opens the water gun for `duration`. Returns `false` when a spray is
    /// already running; the request is then dropped.
    pub fn spray(&mut self, duration: Duration) -> io::Result<bool> {
        if self.spray_until.is_some() {
            debug!("Spray requested while spraying, ignored");
            return Ok(false);
        }

        self.water_gun.set(true)?;
        self.spray_until = Some(Instant::now() + duration);
        self.state.spraying.store(true, Ordering::SeqCst);
        info!("Spraying for {:?}", duration);
        Ok(true)
    }

    fn end_spray(&mut self) {
        if let Err(e) = self.water_gun.set(false) {
            // Keep the deadline so the next idle tick retries.
            warn!("Failed to close water gun: {}", e);
            return;
        }
        self.spray_until = None;
        self.state.spraying.store(false, Ordering::SeqCst);
        debug!("Spray finished");
    }

    /// Turns every output off, reporting the first failure after trying all.
    pub fn all_off(&mut self) -> io::Result<()> {
        let results = [
            self.set_laser(false),
            self.water_gun.set(false),
            self.set_fan(false),
        ];
        self.spray_until = None;
        self.state.spraying.store(false, Ordering::SeqCst);

        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command_executor::accessory::command_sender::AccessoryCommandSender,
        hardware::sim::SimulatedOutput,
    };
    use utilities::command_executor::CommandExecutor;

    struct Outputs {
        laser: SimulatedOutput,
        water_gun: SimulatedOutput,
        fan: SimulatedOutput,
    }

    fn handler() -> (AccessoryHandler, Outputs, Arc<AccessoryState>) {
        let outputs = Outputs {
            laser: SimulatedOutput::new(),
            water_gun: SimulatedOutput::new(),
            fan: SimulatedOutput::new(),
        };
        let state = Arc::new(AccessoryState::default());
        let handler = AccessoryHandler::new(
            Box::new(outputs.laser.clone()),
            Box::new(outputs.water_gun.clone()),
            Box::new(outputs.fan.clone()),
            state.clone(),
        );
        (handler, outputs, state)
    }

    #[test]
    fn spray_closes_after_duration_and_ignores_overlap() {
        let (mut handler, outputs, state) = handler();

        assert!(handler.spray(Duration::from_millis(20)).unwrap());
        assert!(outputs.water_gun.is_on());
        assert!(!handler.spray(Duration::from_secs(10)).unwrap());

        handler.on_idle();
        assert!(outputs.water_gun.is_on());

        std::thread::sleep(Duration::from_millis(30));
        handler.on_idle();
        assert!(!outputs.water_gun.is_on());
        assert!(!state.spraying.load(Ordering::SeqCst));

        assert!(handler.spray(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn all_off_clears_everything() {
        let (mut handler, outputs, state) = handler();
        handler.set_laser(true).unwrap();
        handler.set_fan(true).unwrap();
        handler.spray(Duration::from_secs(5)).unwrap();

        handler.all_off().unwrap();

        assert!(!outputs.laser.is_on());
        assert!(!outputs.water_gun.is_on());
        assert!(!outputs.fan.is_on());
        assert!(!state.laser_on.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn executor_ends_spray_without_further_commands() {
        let (handler, outputs, state) = handler();
        let executor = CommandExecutor::new(handler).with_idle_period(Duration::from_millis(2));
        let sender = AccessoryCommandSender::new(executor.sender());
        let worker = executor.spawn();

        sender.set_laser(true).await.unwrap();
        assert!(state.laser_on.load(Ordering::SeqCst));

        sender.spray(Duration::from_millis(30)).await.unwrap();
        assert!(outputs.water_gun.is_on());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!outputs.water_gun.is_on());

        sender.all_off().await.unwrap();
        assert!(!outputs.laser.is_on());

        drop(sender);
        worker.await.unwrap().unwrap();
    }
}
