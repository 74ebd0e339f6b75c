use std::sync::Arc;

use accel_stepper::{AxisKinematics, Clock, Direction};
use tracing::{debug, warn};

use crate::{context::AxisHandle, hardware::StepEmitter, models::AxisId};

/// One stepper axis: the acceleration profile, the pulse emitter and the
/// clock that decides when the next step is due.
pub struct AxisController {
    id: AxisId,
    kinematics: AxisKinematics,
    emitter: Box<dyn StepEmitter>,
    clock: Arc<dyn Clock>,
    handle: Option<AxisHandle>,
    outputs_enabled: bool,
    failed_steps: u64,
}

impl AxisController {
    pub fn new(
        id: AxisId,
        emitter: Box<dyn StepEmitter>,
        clock: Arc<dyn Clock>,
        max_speed: f64,
        acceleration: f64,
    ) -> Self {
        Self {
            id,
            kinematics: AxisKinematics::with_limits(max_speed, acceleration),
            emitter,
            clock,
            handle: None,
            outputs_enabled: false,
            failed_steps: 0,
        }
    }

    /// Every position change is published to `handle` from now on.
    pub fn attach(&mut self, handle: AxisHandle) {
        handle.publish_position(self.kinematics.current_position());
        self.handle = Some(handle);
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn current_position(&self) -> i64 {
        self.kinematics.current_position()
    }

    pub fn target_position(&self) -> i64 {
        self.kinematics.target_position()
    }

    pub fn distance_to_go(&self) -> i64 {
        self.kinematics.distance_to_go()
    }

    pub fn speed(&self) -> f64 {
        self.kinematics.speed()
    }

    pub fn is_running(&self) -> bool {
        self.kinematics.is_running()
    }

    pub fn outputs_enabled(&self) -> bool {
        self.outputs_enabled
    }

    pub fn set_limits(&mut self, max_speed: f64, acceleration: f64) {
        self.kinematics.set_max_speed(max_speed);
        self.kinematics.set_acceleration(acceleration);
    }

    /// Absolute move with the acceleration profile. Enables the outputs.
    pub fn move_to(&mut self, target: i64) {
        self.enable_outputs();
        self.kinematics.set_target(target);
    }

    pub fn stop(&mut self) {
        self.kinematics.stop();
    }

    /// Drops any constant speed and makes the current position the target.
    pub fn halt(&mut self) {
        self.kinematics.set_speed(0.0);
        self.kinematics.set_target(self.kinematics.current_position());
    }

    /// Constant signed speed for [`AxisController::run_speed`].
    pub fn set_speed(&mut self, steps_per_second: f64) {
        self.kinematics.set_speed(steps_per_second);
    }

    /// Redefines the current position without moving. Cancels any motion.
    pub fn set_current_position(&mut self, position: i64) {
        self.kinematics.set_current_position(position);
        self.publish();
    }

    /// Emits at most one step if one is due. Returns whether the axis still
    /// has somewhere to go.
    pub fn run(&mut self) -> bool {
        if self.poll_step() {
            self.kinematics.recompute_interval();
        }
        self.kinematics.is_running()
    }

    /// Steps at the constant speed set by [`AxisController::set_speed`],
    /// ignoring the target. Returns whether a step was emitted.
    pub fn run_speed(&mut self) -> bool {
        self.poll_step()
    }

    fn poll_step(&mut self) -> bool {
        match self.kinematics.poll_due(self.clock.now_micros()) {
            Some(direction) => {
                self.emit(direction);
                self.publish();
                true
            }
            None => false,
        }
    }

    fn emit(&mut self, direction: Direction) {
        if let Err(e) = self.emitter.step(direction) {
            self.failed_steps += 1;
            // Logged on powers of two so a dead pin does not flood the log.
            if self.failed_steps.is_power_of_two() {
                warn!(
                    "Axis {}: step pulse failed ({} so far): {}",
                    self.id, self.failed_steps, e
                );
            }
        }
    }

    fn publish(&self) {
        if let Some(handle) = &self.handle {
            handle.publish_position(self.kinematics.current_position());
        }
    }

    pub fn enable_outputs(&mut self) {
        if self.outputs_enabled {
            return;
        }
        match self.emitter.enable_outputs() {
            Ok(()) => {
                debug!("Axis {}: outputs enabled", self.id);
                self.outputs_enabled = true;
            }
            Err(e) => warn!("Axis {}: failed to enable outputs: {}", self.id, e),
        }
    }

    pub fn disable_outputs(&mut self) {
        match self.emitter.disable_outputs() {
            Ok(()) => {
                debug!("Axis {}: outputs disabled", self.id);
                self.outputs_enabled = false;
            }
            Err(e) => warn!("Axis {}: failed to disable outputs: {}", self.id, e),
        }
    }
}
