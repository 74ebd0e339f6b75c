use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisId {
    One,
    Two,
}

impl AxisId {
    pub const ALL: [AxisId; 2] = [AxisId::One, AxisId::Two];

    pub fn index(self) -> usize {
        match self {
            AxisId::One => 0,
            AxisId::Two => 1,
        }
    }

    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

impl TryFrom<u8> for AxisId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AxisId::One),
            2 => Ok(AxisId::Two),
            other => Err(other),
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl Serialize for AxisId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.number())
    }
}

impl<'de> Deserialize<'de> for AxisId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let number = u8::deserialize(deserializer)?;
        AxisId::try_from(number)
            .map_err(|n| serde::de::Error::custom(format!("invalid axis {}, expected 1 or 2", n)))
    }
}

/// Largest step target either axis accepts, in both directions.
pub const MAX_TARGET_STEPS: i64 = i32::MAX as i64;

/// Fixed step-to-angle conversion of one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale {
    degrees_per_step: f64,
}

impl AxisScale {
    pub fn new(steps_per_revolution: u32, microstep_fraction: f64, gear_ratio: f64) -> Self {
        Self {
            degrees_per_step: 360.0 / steps_per_revolution as f64 * microstep_fraction * gear_ratio,
        }
    }

    pub fn degrees_per_step(&self) -> f64 {
        self.degrees_per_step
    }

    /// Truncates toward zero.
    pub fn to_steps(&self, degrees: f64) -> i64 {
        (degrees / self.degrees_per_step) as i64
    }

    /// Like [`AxisScale::to_steps`], but `None` for non-finite angles and
    /// targets beyond [`MAX_TARGET_STEPS`].
    pub fn checked_steps(&self, degrees: f64) -> Option<i64> {
        let steps = (degrees / self.degrees_per_step).trunc();
        if steps.is_finite() && steps.abs() <= MAX_TARGET_STEPS as f64 {
            Some(steps as i64)
        } else {
            None
        }
    }

    pub fn to_degrees(&self, steps: i64) -> f64 {
        steps as f64 * self.degrees_per_step
    }

    /// Angle that truncates back to exactly `steps`: the middle of the step,
    /// away from zero.
    pub fn target_degrees(&self, steps: i64) -> f64 {
        (steps as f64 + 0.5 * steps.signum() as f64) * self.degrees_per_step
    }
}

/// Homing / connectivity status of the gimbal as seen by one party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GimbalLinkState {
    Homing,
    HomingError,
    NotFound,
    Ready,
    #[default]
    Unknown,
}

/// Inputs that drive [`GimbalLinkState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    HomingStarted,
    HomingSucceeded,
    HomingFailed,
    TelemetryLost,
    /// Telemetry resumed after a loss; carries the state stashed at loss time.
    TelemetryRestored(GimbalLinkState),
    /// First telemetry message ever received. Its state is taken as is.
    FirstTelemetry(GimbalLinkState),
    TelemetryReported(GimbalLinkState),
}

impl GimbalLinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            GimbalLinkState::Homing => "homing",
            GimbalLinkState::HomingError => "homing_error",
            GimbalLinkState::NotFound => "not_found",
            GimbalLinkState::Ready => "ready",
            GimbalLinkState::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "homing" => GimbalLinkState::Homing,
            "homing_error" => GimbalLinkState::HomingError,
            "not_found" => GimbalLinkState::NotFound,
            "ready" => GimbalLinkState::Ready,
            _ => GimbalLinkState::Unknown,
        }
    }

    pub fn is_ready(self) -> bool {
        self == GimbalLinkState::Ready
    }

    pub fn on(self, event: LinkEvent) -> Self {
        use GimbalLinkState::*;

        match event {
            LinkEvent::HomingStarted => Homing,
            LinkEvent::HomingSucceeded if self == Homing => Ready,
            LinkEvent::HomingFailed if self == Homing => HomingError,
            // A homing result that arrives outside of homing is stale.
            LinkEvent::HomingSucceeded | LinkEvent::HomingFailed => self,
            LinkEvent::TelemetryLost => NotFound,
            LinkEvent::TelemetryRestored(stashed) if self == NotFound => stashed,
            LinkEvent::TelemetryRestored(_) => self,
            LinkEvent::FirstTelemetry(reported) => reported,
            LinkEvent::TelemetryReported(Unknown) => self,
            LinkEvent::TelemetryReported(reported) => reported,
        }
    }
}

impl fmt::Display for GimbalLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for GimbalLinkState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for GimbalLinkState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(GimbalLinkState::parse(&value))
    }
}

/// Periodic state broadcast on the telemetry port. Missing fields decode to
/// their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySnapshot {
    pub axis1_degrees: f64,
    pub axis2_degrees: f64,
    pub laser_on: bool,
    pub sensor1: bool,
    pub sensor2: bool,
    pub link_state: GimbalLinkState,
    pub controller_temp_celsius: Option<f32>,
    pub fan_on: bool,
}

impl TelemetrySnapshot {
    pub fn degrees(&self, axis: AxisId) -> f64 {
        match axis {
            AxisId::One => self.axis1_degrees,
            AxisId::Two => self.axis2_degrees,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub axis1_degrees: f64,
    pub axis2_degrees: f64,
    pub laser_on: bool,
    pub link_state: GimbalLinkState,
    pub sensor1: bool,
    pub sensor2: bool,
}
