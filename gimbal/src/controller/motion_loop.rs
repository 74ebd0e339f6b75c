use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use accel_stepper::Clock;
use tracing::{error, info, warn};

use crate::{
    context::{AxisHandle, SharedContext},
    controller::{
        axis_controller::AxisController,
        homing::{HomingController, HomingSettings},
    },
    hardware::DigitalInput,
    models::{AxisId, LinkEvent},
};

/// Operational limits restored after homing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub max_speed: f64,
    pub acceleration: f64,
}

pub struct MotionAxis {
    pub controller: AxisController,
    pub sensor: Arc<dyn DigitalInput>,
    pub homing: HomingSettings,
    pub limits: AxisLimits,
}

/// Sole owner of both axis controllers. Runs homing, then services move
/// requests every period until shutdown.
pub struct MotionLoop {
    axes: [MotionAxis; 2],
    context: Arc<SharedContext>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl MotionLoop {
    pub fn new(mut axes: [MotionAxis; 2], context: Arc<SharedContext>, period: Duration) -> Self {
        for (axis, id) in axes.iter_mut().zip(AxisId::ALL) {
            axis.controller.attach(context.axis(id).clone());
        }

        let clock = axes[0].controller.clock().clone();

        Self {
            axes,
            context,
            clock,
            period,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("motion-loop".to_string())
            .spawn(move || self.run())
    }

    pub fn run(mut self) {
        self.home_all();

        while !self.context.shutdown().is_triggered() {
            if self.context.take_rehome_request() {
                self.home_all();
                continue;
            }

            if self.context.link_state().is_ready() {
                for (axis, id) in self.axes.iter_mut().zip(AxisId::ALL) {
                    service(axis, self.context.axis(id));
                }
            }

            self.clock.sleep(self.period);
        }

        for axis in &mut self.axes {
            axis.controller.halt();
            axis.controller.disable_outputs();
        }
        info!("Motion loop stopped, outputs disabled");
    }

    /// Homes both axes one after the other.
    fn home_all(&mut self) {
        self.context.apply_link_event(LinkEvent::HomingStarted);

        for (axis, id) in self.axes.iter_mut().zip(AxisId::ALL) {
            // Requests made before or during homing refer to the old zero.
            self.context.axis(id).take_requests();

            let result = HomingController::new(
                &mut axis.controller,
                axis.sensor.as_ref(),
                &axis.homing,
                self.context.shutdown(),
            )
            .home();

            axis.controller
                .set_limits(axis.limits.max_speed, axis.limits.acceleration);

            if let Err(e) = result {
                error!("Homing aborted: {}", e);
                self.context.apply_link_event(LinkEvent::HomingFailed);
                return;
            }
        }

        self.context.apply_link_event(LinkEvent::HomingSucceeded);
    }
}

fn service(axis: &mut MotionAxis, handle: &AxisHandle) {
    let requests = handle.take_requests();
    let controller = &mut axis.controller;

    if let Some(enabled) = requests.outputs {
        if enabled {
            controller.enable_outputs();
        } else {
            if controller.is_running() {
                warn!("Axis {}: outputs disabled while moving", controller.id());
                controller.halt();
            }
            controller.disable_outputs();
        }
    }
    if let Some(target) = requests.target {
        controller.move_to(target);
    }
    if requests.stop {
        controller.stop();
    }

    controller.run();
}
