use std::{io, sync::Arc};

use accel_stepper::Direction;

use crate::config::GimbalConfig;

#[cfg(feature = "gpio-hardware")]
pub mod gpio;
pub mod sim;
pub mod thermal;

/// Produces one physical step pulse per call and gates the driver outputs.
pub trait StepEmitter: Send {
    fn step(&mut self, direction: Direction) -> io::Result<()>;
    fn enable_outputs(&mut self) -> io::Result<()>;
    fn disable_outputs(&mut self) -> io::Result<()>;
}

pub trait DigitalInput: Send + Sync {
    fn is_active(&self) -> io::Result<bool>;
}

pub trait DigitalOutput: Send {
    fn set(&mut self, on: bool) -> io::Result<()>;
    fn is_on(&self) -> bool;
}

/// Every pin the gimbal owns, grouped per consumer.
pub struct Hardware {
    pub steppers: [Box<dyn StepEmitter>; 2],
    pub sensors: [Arc<dyn DigitalInput>; 2],
    pub laser: Box<dyn DigitalOutput>,
    pub water_gun: Box<dyn DigitalOutput>,
    pub fan: Box<dyn DigitalOutput>,
}

#[cfg(feature = "gpio-hardware")]
pub fn open(config: &GimbalConfig) -> io::Result<Hardware> {
    gpio::open(config)
}

#[cfg(not(feature = "gpio-hardware"))]
pub fn open(config: &GimbalConfig) -> io::Result<Hardware> {
    tracing::warn!("Built without gpio-hardware, using simulated pins");
    Ok(sim::SimulatedGimbal::new(config).into_hardware())
}
