use std::{io, sync::Arc, thread, time::Duration};

use accel_stepper::Direction;
use sysfs_gpio::{Direction as PinDirection, Pin};
use tracing::info;

use super::{DigitalInput, DigitalOutput, Hardware, StepEmitter};
use crate::config::{AxisConfig, GimbalConfig};

const EXPORT_SETTLE: Duration = Duration::from_millis(10);

fn gpio_error(e: sysfs_gpio::Error) -> io::Error {
    io::Error::other(e)
}

fn export(number: u64, direction: PinDirection) -> io::Result<Pin> {
    let pin = Pin::new(number);
    pin.export().map_err(gpio_error)?;
    // udev needs a moment to fix permissions on freshly exported pins.
    thread::sleep(EXPORT_SETTLE);
    pin.set_direction(direction).map_err(gpio_error)?;
    Ok(pin)
}

/// STEP/DIR driver with an active-low enable line.
pub struct GpioStepper {
    step: Pin,
    dir: Pin,
    enable: Pin,
    pulse: Duration,
    invert_direction: bool,
    last_direction: Option<Direction>,
}

impl GpioStepper {
    pub fn open(axis: &AxisConfig, pulse: Duration) -> io::Result<Self> {
        let step = export(axis.step_pin, PinDirection::Low)?;
        let dir = export(axis.dir_pin, PinDirection::Low)?;
        let enable = export(axis.enable_pin, PinDirection::High)?;

        info!(
            "Stepper pins ready: step={}, dir={}, enable={}",
            axis.step_pin, axis.dir_pin, axis.enable_pin
        );

        Ok(Self {
            step,
            dir,
            enable,
            pulse,
            invert_direction: axis.invert_direction,
            last_direction: None,
        })
    }
}

impl StepEmitter for GpioStepper {
    fn step(&mut self, direction: Direction) -> io::Result<()> {
        if self.last_direction != Some(direction) {
            let forward = (direction == Direction::Forward) != self.invert_direction;
            self.dir.set_value(forward as u8).map_err(gpio_error)?;
            self.last_direction = Some(direction);
        }

        self.step.set_value(1).map_err(gpio_error)?;
        thread::sleep(self.pulse);
        self.step.set_value(0).map_err(gpio_error)
    }

    fn enable_outputs(&mut self) -> io::Result<()> {
        self.enable.set_value(0).map_err(gpio_error)
    }

    fn disable_outputs(&mut self) -> io::Result<()> {
        self.enable.set_value(1).map_err(gpio_error)
    }
}

pub struct GpioInput {
    pin: Pin,
    active_low: bool,
}

impl GpioInput {
    pub fn open(number: u64, active_low: bool) -> io::Result<Self> {
        Ok(Self {
            pin: export(number, PinDirection::In)?,
            active_low,
        })
    }
}

impl DigitalInput for GpioInput {
    fn is_active(&self) -> io::Result<bool> {
        let level = self.pin.get_value().map_err(gpio_error)? != 0;
        Ok(level != self.active_low)
    }
}

pub struct GpioOutput {
    pin: Pin,
    on: bool,
}

impl GpioOutput {
    pub fn open(number: u64) -> io::Result<Self> {
        Ok(Self {
            pin: export(number, PinDirection::Low)?,
            on: false,
        })
    }
}

impl DigitalOutput for GpioOutput {
    fn set(&mut self, on: bool) -> io::Result<()> {
        self.pin.set_value(on as u8).map_err(gpio_error)?;
        self.on = on;
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

pub fn open(config: &GimbalConfig) -> io::Result<Hardware> {
    let pulse = config.motion.step_pulse();
    let sensors: [Arc<dyn DigitalInput>; 2] = [
        Arc::new(GpioInput::open(
            config.axis1.sensor_pin,
            config.axis1.sensor_active_low,
        )?),
        Arc::new(GpioInput::open(
            config.axis2.sensor_pin,
            config.axis2.sensor_active_low,
        )?),
    ];

    Ok(Hardware {
        steppers: [
            Box::new(GpioStepper::open(&config.axis1, pulse)?),
            Box::new(GpioStepper::open(&config.axis2, pulse)?),
        ],
        sensors,
        laser: Box::new(GpioOutput::open(config.accessories.laser_pin)?),
        water_gun: Box::new(GpioOutput::open(config.accessories.water_gun_pin)?),
        fan: Box::new(GpioOutput::open(config.accessories.fan_pin)?),
    })
}
