/// Ramp correction for the first step interval (Austin's approximation).
const C0_CORRECTION: f64 = 0.676;
const MICROS_PER_SECOND: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Reverse,
    Forward,
}

impl Direction {
    pub fn sign(self) -> i64 {
        match self {
            Direction::Reverse => -1,
            Direction::Forward => 1,
        }
    }
}

/// Acceleration ramp for a single stepper axis.
///
/// Positions are step counts, speeds are steps per second and all intervals
/// are positive microsecond durations. Direction is carried by `speed` and
/// `direction` only, never by the intervals.
///
/// The struct never fails: degenerate limits are ignored and the previous
/// value kept.
#[derive(Debug, Clone)]
pub struct AxisKinematics {
    current_position: i64,
    target_position: i64,
    speed: f64,
    max_speed: f64,
    acceleration: f64,
    step_interval: f64,
    last_step_time: u64,

    // Signed step counter inside the current ramp segment:
    // positive while accelerating, negative while decelerating.
    n: i64,
    c0: f64,
    cn: f64,
    cmin: f64,
    direction: Direction,
}

impl Default for AxisKinematics {
    fn default() -> Self {
        Self::new()
    }
}

impl AxisKinematics {
    pub fn new() -> Self {
        let mut kinematics = Self {
            current_position: 0,
            target_position: 0,
            speed: 0.0,
            max_speed: 1.0,
            acceleration: 0.0,
            step_interval: 0.0,
            last_step_time: 0,
            n: 0,
            c0: 0.0,
            cn: 0.0,
            cmin: MICROS_PER_SECOND,
            direction: Direction::Reverse,
        };
        kinematics.set_acceleration(1.0);
        kinematics
    }

    pub fn with_limits(max_speed: f64, acceleration: f64) -> Self {
        let mut kinematics = Self::new();
        kinematics.set_max_speed(max_speed);
        kinematics.set_acceleration(acceleration);
        kinematics
    }

    pub fn current_position(&self) -> i64 {
        self.current_position
    }

    pub fn target_position(&self) -> i64 {
        self.target_position
    }

    pub fn distance_to_go(&self) -> i64 {
        self.target_position.saturating_sub(self.current_position)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn step_interval(&self) -> f64 {
        self.step_interval
    }

    pub fn ramp_index(&self) -> i64 {
        self.n
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_running(&self) -> bool {
        !(self.speed == 0.0 && self.target_position == self.current_position)
    }

    pub fn set_target(&mut self, position: i64) {
        if self.target_position != position {
            self.target_position = position;
            self.recompute_interval();
        }
    }

    pub fn move_by(&mut self, relative: i64) {
        self.set_target(self.current_position.saturating_add(relative));
    }

    /// Resets position, target, ramp and speed in one go. Used to declare a
    /// new zero after homing.
    pub fn set_current_position(&mut self, position: i64) {
        self.target_position = position;
        self.current_position = position;
        self.n = 0;
        self.step_interval = 0.0;
        self.speed = 0.0;
    }

    /// Returns the direction of the step that is due at `now_micros`, if any,
    /// and accounts for it in the current position.
    pub fn poll_due(&mut self, now_micros: u64) -> Option<Direction> {
        if self.step_interval == 0.0 {
            return None;
        }

        let elapsed = now_micros.saturating_sub(self.last_step_time);
        if elapsed as f64 >= self.step_interval {
            self.current_position = self.current_position.saturating_add(self.direction.sign());
            self.last_step_time = now_micros;
            Some(self.direction)
        } else {
            None
        }
    }

    fn steps_to_stop(&self) -> i64 {
        ((self.speed * self.speed) / (2.0 * self.acceleration)) as i64
    }

    pub fn recompute_interval(&mut self) {
        let distance_to = self.distance_to_go();
        let steps_to_stop = self.steps_to_stop();

        if distance_to == 0 && steps_to_stop <= 1 {
            self.step_interval = 0.0;
            self.speed = 0.0;
            self.n = 0;
            return;
        }

        if distance_to > 0 {
            // Target ahead: decelerate if we would overshoot or are heading away.
            if self.n > 0 {
                if steps_to_stop >= distance_to || self.direction == Direction::Reverse {
                    self.n = -steps_to_stop;
                }
            } else if self.n < 0
                && steps_to_stop < distance_to
                && self.direction == Direction::Forward
            {
                self.n = -self.n;
            }
        } else if distance_to < 0 {
            if self.n > 0 {
                if steps_to_stop >= distance_to.saturating_neg()
                    || self.direction == Direction::Forward
                {
                    self.n = -steps_to_stop;
                }
            } else if self.n < 0
                && steps_to_stop < distance_to.saturating_neg()
                && self.direction == Direction::Reverse
            {
                self.n = -self.n;
            }
        }

        if self.n == 0 {
            self.cn = self.c0.max(self.cmin);
            self.direction = if distance_to > 0 {
                Direction::Forward
            } else {
                Direction::Reverse
            };
        } else {
            self.cn -= (2.0 * self.cn) / ((4.0 * self.n as f64) + 1.0);
            self.cn = self.cn.max(self.cmin);
        }

        self.n += 1;
        self.step_interval = self.cn;
        self.speed = MICROS_PER_SECOND / self.cn;
        if self.direction == Direction::Reverse {
            self.speed = -self.speed;
        }
    }

    pub fn set_max_speed(&mut self, speed: f64) {
        let speed = speed.abs();
        if speed == 0.0 || !speed.is_finite() {
            return;
        }

        if self.max_speed != speed {
            self.max_speed = speed;
            self.cmin = MICROS_PER_SECOND / speed;

            if self.n > 0 {
                self.n = self.steps_to_stop();
                self.recompute_interval();
            }
        }
    }

    pub fn set_acceleration(&mut self, acceleration: f64) {
        let acceleration = acceleration.abs();
        if acceleration == 0.0 || !acceleration.is_finite() {
            return;
        }

        if self.acceleration != acceleration {
            self.n = (self.n as f64 * (self.acceleration / acceleration)) as i64;
            self.c0 = C0_CORRECTION * (2.0 / acceleration).sqrt() * MICROS_PER_SECOND;
            self.acceleration = acceleration;
            self.recompute_interval();
        }
    }

    /// Constant speed mode, bypassing the ramp. Clamped to the max speed.
    pub fn set_speed(&mut self, speed: f64) {
        if speed == self.speed || !speed.is_finite() {
            return;
        }

        let speed = speed.clamp(-self.max_speed, self.max_speed);
        if speed == 0.0 {
            self.step_interval = 0.0;
        } else {
            self.step_interval = (MICROS_PER_SECOND / speed).abs();
            self.direction = if speed > 0.0 {
                Direction::Forward
            } else {
                Direction::Reverse
            };
        }
        self.speed = speed;
    }

    /// Retargets to the closest position reachable with a full deceleration.
    pub fn stop(&mut self) {
        if self.speed != 0.0 {
            let steps_to_stop = self.steps_to_stop().saturating_add(1);
            if self.speed > 0.0 {
                self.move_by(steps_to_stop);
            } else {
                self.move_by(-steps_to_stop);
            }
        }
    }
}
