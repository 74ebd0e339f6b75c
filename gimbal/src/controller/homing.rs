use std::time::Duration;

use accel_stepper::Direction;
use tracing::{debug, info, instrument, warn};
use utilities::shutdown::Shutdown;

use crate::{
    controller::axis_controller::AxisController, error::HomingError, hardware::DigitalInput,
};

#[derive(Debug, Clone, PartialEq)]
pub struct HomingSettings {
    pub max_speed: f64,
    pub acceleration: f64,
    /// Constant speed used while probing for the sensor, steps per second.
    pub homing_speed: f64,
    /// Largest distance searched in either direction.
    pub search_bound_steps: i64,
    /// A forward hit closer than this share of the bound skips the backward probe.
    pub fast_path_fraction: f64,
    pub debounce: Duration,
    pub step_period: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    Idle,
    BackOff,
    ProbeForward,
    ProbeBackward,
    TrackTrigger,
    Center,
    Done,
    Failed,
}

/// Where the trigger zone was found, in steps before re-zeroing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomingReport {
    pub direction: Direction,
    pub trigger_start: i64,
    pub trigger_end: i64,
    pub midpoint: i64,
}

/// Finds the center of the reference sensor's trigger zone and declares it
/// position zero. Blocks the calling thread until done.
pub struct HomingController<'a> {
    axis: &'a mut AxisController,
    sensor: &'a dyn DigitalInput,
    settings: &'a HomingSettings,
    shutdown: &'a Shutdown,
    phase: HomingPhase,
}

impl<'a> HomingController<'a> {
    pub fn new(
        axis: &'a mut AxisController,
        sensor: &'a dyn DigitalInput,
        settings: &'a HomingSettings,
        shutdown: &'a Shutdown,
    ) -> Self {
        Self {
            axis,
            sensor,
            settings,
            shutdown,
            phase: HomingPhase::Idle,
        }
    }

    pub fn phase(&self) -> HomingPhase {
        self.phase
    }

    /// Runs the whole sequence. On failure the axis is returned to where it
    /// started. Outputs are disabled either way.
    #[instrument(skip(self), fields(axis = %self.axis.id()))]
    pub fn home(&mut self) -> Result<HomingReport, HomingError> {
        self.axis
            .set_limits(self.settings.max_speed, self.settings.acceleration);
        self.axis.enable_outputs();
        let origin = self.axis.current_position();

        let result = self.search();
        match &result {
            Ok(report) => {
                self.enter(HomingPhase::Done);
                info!(
                    "Axis {} homed: trigger zone {}..{} ({:?}), center {}",
                    self.axis.id(),
                    report.trigger_start,
                    report.trigger_end,
                    report.direction,
                    report.midpoint
                );
            }
            Err(e) => {
                self.enter(HomingPhase::Failed);
                warn!("Homing failed: {}", e);
                if !matches!(e, HomingError::Interrupted { .. }) {
                    if let Err(e) = self.move_and_wait(origin) {
                        warn!("Axis {} did not return to {}: {}", self.axis.id(), origin, e);
                    }
                }
            }
        }

        self.axis.halt();
        self.axis.disable_outputs();
        result
    }

    fn enter(&mut self, phase: HomingPhase) {
        debug!("Axis {}: homing phase {:?}", self.axis.id(), phase);
        self.phase = phase;
    }

    fn not_found(&self) -> HomingError {
        HomingError::SensorNotFound {
            axis: self.axis.id(),
            phase: self.phase,
        }
    }

    fn search(&mut self) -> Result<HomingReport, HomingError> {
        if self.read_sensor() {
            self.enter(HomingPhase::BackOff);
            if self.walk_until(Direction::Reverse, false)?.is_none() {
                return Err(self.not_found());
            }
        }

        let start = self.axis.current_position();
        let fast_path =
            (self.settings.search_bound_steps as f64 * self.settings.fast_path_fraction) as i64;

        self.enter(HomingPhase::ProbeForward);
        let forward = self.walk_until(Direction::Forward, true)?;

        let direction = match forward {
            Some(distance) if distance <= fast_path => Direction::Forward,
            _ => {
                self.move_and_wait(start)?;
                self.enter(HomingPhase::ProbeBackward);
                let backward = self.walk_until(Direction::Reverse, true)?;

                match (forward, backward) {
                    (Some(f), Some(b)) if f < b => {
                        self.move_and_wait(start)?;
                        Direction::Forward
                    }
                    (_, Some(_)) => Direction::Reverse,
                    (Some(_), None) => {
                        self.move_and_wait(start)?;
                        Direction::Forward
                    }
                    (None, None) => return Err(self.not_found()),
                }
            }
        };

        self.enter(HomingPhase::TrackTrigger);
        if self.walk_until(direction, true)?.is_none() {
            return Err(self.not_found());
        }
        let trigger_start = self.axis.current_position();

        if self.walk_until(direction, false)?.is_none() {
            return Err(self.not_found());
        }
        // Last position that still read active.
        let trigger_end = self.axis.current_position() - direction.sign();

        self.enter(HomingPhase::Center);
        let midpoint = (trigger_start + trigger_end).div_euclid(2);
        self.move_and_wait(midpoint)?;
        self.axis.set_current_position(0);

        Ok(HomingReport {
            direction,
            trigger_start,
            trigger_end,
            midpoint,
        })
    }

    fn read_sensor(&self) -> bool {
        self.axis.clock().sleep(self.settings.debounce);
        self.sensor.is_active().unwrap_or_else(|e| {
            warn!("Axis {}: sensor read failed: {}", self.axis.id(), e);
            false
        })
    }

    fn check_shutdown(&self) -> Result<(), HomingError> {
        if self.shutdown.is_triggered() {
            Err(HomingError::Interrupted {
                axis: self.axis.id(),
            })
        } else {
            Ok(())
        }
    }

    /// Walks at homing speed until the sensor reads `active`. Returns the
    /// distance covered, or `None` once the search bound is exhausted.
    fn walk_until(
        &mut self,
        direction: Direction,
        active: bool,
    ) -> Result<Option<i64>, HomingError> {
        let from = self.axis.current_position();
        self.axis
            .set_speed(self.settings.homing_speed.abs() * direction.sign() as f64);

        let found = loop {
            self.check_shutdown().inspect_err(|_| self.axis.halt())?;

            let travelled = (self.axis.current_position() - from).abs();
            if self.read_sensor() == active {
                break Some(travelled);
            }
            if travelled >= self.settings.search_bound_steps {
                break None;
            }

            self.axis.run_speed();
            self.axis.clock().sleep(self.settings.step_period);
        };

        self.axis.halt();
        Ok(found)
    }

    fn move_and_wait(&mut self, target: i64) -> Result<(), HomingError> {
        self.axis.move_to(target);
        while self.axis.run() {
            if self.shutdown.is_triggered() {
                self.axis.halt();
                return Err(HomingError::Interrupted {
                    axis: self.axis.id(),
                });
            }
            self.axis.clock().sleep(self.settings.step_period);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hardware::sim::{FixedInput, SimulatedStepper, StepperProbe, WindowSensor},
        models::AxisId,
    };
    use accel_stepper::ManualClock;
    use std::sync::Arc;

    fn settings() -> HomingSettings {
        HomingSettings {
            max_speed: 1000.0,
            acceleration: 1000.0,
            homing_speed: 500.0,
            search_bound_steps: 1000,
            fast_path_fraction: 0.5,
            debounce: Duration::from_millis(5),
            step_period: Duration::from_millis(1),
        }
    }

    fn axis() -> (AxisController, StepperProbe) {
        let stepper = SimulatedStepper::new();
        let probe = stepper.probe();
        let axis = AxisController::new(
            AxisId::One,
            Box::new(stepper),
            Arc::new(ManualClock::new()),
            8000.0,
            20000.0,
        );
        (axis, probe)
    }

    fn home_with_window(
        window: std::ops::RangeInclusive<i64>,
    ) -> (Result<HomingReport, HomingError>, AxisController, StepperProbe) {
        let (mut axis, probe) = axis();
        let sensor = WindowSensor::new(probe.clone(), window);
        let settings = settings();
        let shutdown = Shutdown::new();

        let result = HomingController::new(&mut axis, &sensor, &settings, &shutdown).home();
        (result, axis, probe)
    }

    #[test]
    fn centers_on_nearby_forward_window() {
        let (result, axis, probe) = home_with_window(100..=140);
        let report = result.unwrap();

        assert_eq!(report.direction, Direction::Forward);
        assert_eq!((report.trigger_start, report.trigger_end), (100, 140));
        assert_eq!(report.midpoint, 120);

        assert_eq!(axis.current_position(), 0);
        assert_eq!(probe.position(), 120);
        assert!(!probe.outputs_enabled());
        assert!(!axis.is_running());
    }

    #[test]
    fn probes_backward_when_forward_hit_is_far() {
        let (result, _axis, probe) = home_with_window(-140..=-100);
        let report = result.unwrap();

        assert_eq!(report.direction, Direction::Reverse);
        assert_eq!((report.trigger_start, report.trigger_end), (-100, -140));
        assert_eq!(probe.position(), -120);
    }

    #[test]
    fn far_forward_window_is_used_when_backward_finds_nothing() {
        let (result, _axis, probe) = home_with_window(700..=740);
        let report = result.unwrap();

        assert_eq!(report.direction, Direction::Forward);
        assert_eq!(probe.position(), 720);
    }

    #[test]
    fn nearer_window_wins_when_both_directions_fire() {
        let (mut axis, probe) = axis();
        let forward = WindowSensor::new(probe.clone(), 800..=820);
        let backward = WindowSensor::new(probe.clone(), -620..=-600);
        let sensor = EitherSensor(forward, backward);
        let settings = settings();
        let shutdown = Shutdown::new();

        let report = HomingController::new(&mut axis, &sensor, &settings, &shutdown)
            .home()
            .unwrap();

        assert_eq!(report.direction, Direction::Reverse);
        assert_eq!(probe.position(), -610);
    }

    #[test]
    fn starting_inside_the_zone_backs_off_first() {
        let (result, _axis, probe) = home_with_window(-20..=20);
        let report = result.unwrap();

        assert_eq!((report.trigger_start, report.trigger_end), (-20, 20));
        assert_eq!(probe.position(), 0);
    }

    #[test]
    fn missing_sensor_fails_and_returns_to_start() {
        let (mut axis, probe) = axis();
        let sensor = FixedInput(false);
        let settings = settings();
        let shutdown = Shutdown::new();

        let mut homing = HomingController::new(&mut axis, &sensor, &settings, &shutdown);
        let err = homing.home().unwrap_err();

        assert_eq!(
            err,
            HomingError::SensorNotFound {
                axis: AxisId::One,
                phase: HomingPhase::ProbeBackward,
            }
        );
        assert_eq!(homing.phase(), HomingPhase::Failed);
        assert_eq!(probe.position(), 0);
        assert_eq!(axis.current_position(), 0);
        assert!(!probe.outputs_enabled());
    }

    #[test]
    fn stuck_sensor_fails_during_back_off() {
        let (mut axis, probe) = axis();
        let sensor = FixedInput(true);
        let settings = settings();
        let shutdown = Shutdown::new();

        let err = HomingController::new(&mut axis, &sensor, &settings, &shutdown)
            .home()
            .unwrap_err();

        assert!(matches!(
            err,
            HomingError::SensorNotFound {
                phase: HomingPhase::BackOff,
                ..
            }
        ));
        assert_eq!(probe.position(), 0);
    }

    #[test]
    fn shutdown_interrupts_without_moving_back() {
        let (mut axis, probe) = axis();
        let sensor = FixedInput(false);
        let settings = settings();
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let err = HomingController::new(&mut axis, &sensor, &settings, &shutdown)
            .home()
            .unwrap_err();

        assert_eq!(err, HomingError::Interrupted { axis: AxisId::One });
        assert_eq!(probe.position(), 0);
        assert!(!probe.outputs_enabled());
    }

    #[test]
    fn shutdown_during_return_leaves_axis_where_it_stopped() {
        let (mut axis, probe) = axis();
        let settings = settings();
        let shutdown = Shutdown::new();
        let sensor = ShutdownAt {
            probe: probe.clone(),
            position: -settings.search_bound_steps,
            shutdown: shutdown.clone(),
        };

        let err = HomingController::new(&mut axis, &sensor, &settings, &shutdown)
            .home()
            .unwrap_err();

        assert!(matches!(
            err,
            HomingError::SensorNotFound {
                phase: HomingPhase::ProbeBackward,
                ..
            }
        ));
        assert!(probe.position() < -990);
        assert!(!probe.outputs_enabled());
    }

    /// Never fires; triggers shutdown once the probe reaches `position`.
    struct ShutdownAt {
        probe: StepperProbe,
        position: i64,
        shutdown: Shutdown,
    }

    impl DigitalInput for ShutdownAt {
        fn is_active(&self) -> std::io::Result<bool> {
            if self.probe.position() <= self.position {
                self.shutdown.trigger();
            }
            Ok(false)
        }
    }

    struct EitherSensor(WindowSensor, WindowSensor);

    impl DigitalInput for EitherSensor {
        fn is_active(&self) -> std::io::Result<bool> {
            Ok(self.0.is_active()? || self.1.is_active()?)
        }
    }
}
