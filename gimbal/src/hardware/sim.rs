use std::{
    io,
    ops::RangeInclusive,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
    },
};

use accel_stepper::Direction;

use super::{DigitalInput, DigitalOutput, Hardware, StepEmitter};
use crate::config::GimbalConfig;

/// Stepper driver that records where the shaft physically is.
pub struct SimulatedStepper {
    probe: StepperProbe,
}

/// Read side of a [`SimulatedStepper`], shared with sensors and tests.
#[derive(Clone, Default)]
pub struct StepperProbe {
    position: Arc<AtomicI64>,
    enabled: Arc<AtomicBool>,
    pulses: Arc<AtomicU64>,
}

impl SimulatedStepper {
    pub fn new() -> Self {
        Self {
            probe: StepperProbe::default(),
        }
    }

    pub fn probe(&self) -> StepperProbe {
        self.probe.clone()
    }
}

impl Default for SimulatedStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl StepEmitter for SimulatedStepper {
    fn step(&mut self, direction: Direction) -> io::Result<()> {
        self.probe
            .position
            .fetch_add(direction.sign(), Ordering::SeqCst);
        self.probe.pulses.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn enable_outputs(&mut self) -> io::Result<()> {
        self.probe.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable_outputs(&mut self) -> io::Result<()> {
        self.probe.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl StepperProbe {
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn outputs_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::Relaxed)
    }
}

/// Reference sensor that reads active while the shaft is inside `window`.
pub struct WindowSensor {
    probe: StepperProbe,
    window: RangeInclusive<i64>,
}

impl WindowSensor {
    pub fn new(probe: StepperProbe, window: RangeInclusive<i64>) -> Self {
        Self { probe, window }
    }
}

impl DigitalInput for WindowSensor {
    fn is_active(&self) -> io::Result<bool> {
        Ok(self.window.contains(&self.probe.position()))
    }
}

/// Input stuck at a fixed level.
pub struct FixedInput(pub bool);

impl DigitalInput for FixedInput {
    fn is_active(&self) -> io::Result<bool> {
        Ok(self.0)
    }
}

#[derive(Clone, Default)]
pub struct SimulatedOutput {
    state: Arc<AtomicBool>,
}

impl SimulatedOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DigitalOutput for SimulatedOutput {
    fn set(&mut self, on: bool) -> io::Result<()> {
        self.state.store(on, Ordering::SeqCst);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.state.load(Ordering::SeqCst)
    }
}

/// Full simulated pin set with handles kept for inspection.
pub struct SimulatedGimbal {
    pub steppers: [SimulatedStepper; 2],
    pub windows: [RangeInclusive<i64>; 2],
    pub laser: SimulatedOutput,
    pub water_gun: SimulatedOutput,
    pub fan: SimulatedOutput,
}

impl SimulatedGimbal {
    pub fn new(config: &GimbalConfig) -> Self {
        let [a1, b1] = config.axis1.simulated_sensor_window;
        let [a2, b2] = config.axis2.simulated_sensor_window;

        Self {
            steppers: [SimulatedStepper::new(), SimulatedStepper::new()],
            windows: [a1..=b1, a2..=b2],
            laser: SimulatedOutput::new(),
            water_gun: SimulatedOutput::new(),
            fan: SimulatedOutput::new(),
        }
    }

    pub fn probes(&self) -> [StepperProbe; 2] {
        [self.steppers[0].probe(), self.steppers[1].probe()]
    }

    pub fn into_hardware(self) -> Hardware {
        let [first, second] = self.steppers;
        let [window1, window2] = self.windows;

        let sensors: [Arc<dyn DigitalInput>; 2] = [
            Arc::new(WindowSensor::new(first.probe(), window1)),
            Arc::new(WindowSensor::new(second.probe(), window2)),
        ];

        Hardware {
            steppers: [Box::new(first), Box::new(second)],
            sensors,
            laser: Box::new(self.laser),
            water_gun: Box::new(self.water_gun),
            fan: Box::new(self.fan),
        }
    }
}
