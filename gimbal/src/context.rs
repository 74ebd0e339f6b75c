use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering},
};

use tracing::{info, warn};
use utilities::shutdown::Shutdown;

use crate::{
    hardware::DigitalInput,
    models::{
        AxisId, AxisScale, GimbalLinkState, LinkEvent, StatusReport, TelemetrySnapshot,
    },
};

const NO_TARGET: i64 = i64::MIN;

const OUTPUTS_UNCHANGED: u8 = 0;
const OUTPUTS_ON: u8 = 1;
const OUTPUTS_OFF: u8 = 2;

/// Lock-free mailbox between requesters and the motion loop. The loop is the
/// only writer of `position`; everybody else only posts requests.
struct AxisShared {
    position: AtomicI64,
    pending_target: AtomicI64,
    stop_requested: AtomicBool,
    outputs_request: AtomicU8,
}

/// Requests drained by the motion loop in one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AxisRequests {
    pub target: Option<i64>,
    pub stop: bool,
    pub outputs: Option<bool>,
}

#[derive(Clone)]
pub struct AxisHandle {
    id: AxisId,
    scale: AxisScale,
    shared: Arc<AxisShared>,
}

impl AxisHandle {
    pub fn new(id: AxisId, scale: AxisScale) -> Self {
        Self {
            id,
            scale,
            shared: Arc::new(AxisShared {
                position: AtomicI64::new(0),
                pending_target: AtomicI64::new(NO_TARGET),
                stop_requested: AtomicBool::new(false),
                outputs_request: AtomicU8::new(OUTPUTS_UNCHANGED),
            }),
        }
    }

    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn scale(&self) -> AxisScale {
        self.scale
    }

    /// Replaces any target that has not been picked up yet.
    pub fn request_move(&self, target: i64) {
        self.shared.stop_requested.store(false, Ordering::SeqCst);
        self.shared
            .pending_target
            .store(target.max(NO_TARGET + 1), Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.shared.pending_target.store(NO_TARGET, Ordering::SeqCst);
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_outputs(&self, enabled: bool) {
        let request = if enabled { OUTPUTS_ON } else { OUTPUTS_OFF };
        self.shared.outputs_request.store(request, Ordering::SeqCst);
    }

    pub fn position(&self) -> i64 {
        self.shared.position.load(Ordering::SeqCst)
    }

    pub fn degrees(&self) -> f64 {
        self.scale.to_degrees(self.position())
    }

    pub(crate) fn publish_position(&self, position: i64) {
        self.shared.position.store(position, Ordering::SeqCst);
    }

    pub(crate) fn take_requests(&self) -> AxisRequests {
        let target = self.shared.pending_target.swap(NO_TARGET, Ordering::SeqCst);
        let outputs = match self
            .shared
            .outputs_request
            .swap(OUTPUTS_UNCHANGED, Ordering::SeqCst)
        {
            OUTPUTS_ON => Some(true),
            OUTPUTS_OFF => Some(false),
            _ => None,
        };

        AxisRequests {
            target: (target != NO_TARGET).then_some(target),
            stop: self.shared.stop_requested.swap(false, Ordering::SeqCst),
            outputs,
        }
    }
}

/// Link state guarded so that every transition is a read-modify-write.
pub struct LinkStateCell {
    state: Mutex<GimbalLinkState>,
}

impl LinkStateCell {
    pub fn new(initial: GimbalLinkState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> GimbalLinkState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, event: LinkEvent) -> GimbalLinkState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = state.on(event);
        if next != *state {
            info!("Gimbal link state {} -> {} ({:?})", *state, next, event);
            *state = next;
        }
        next
    }
}

#[derive(Default)]
pub struct AccessoryState {
    pub laser_on: AtomicBool,
    pub fan_on: AtomicBool,
    pub spraying: AtomicBool,
}

/// Everything the server side shares between the motion loop, the
/// accessory executor, the state monitor and the network handlers.
pub struct SharedContext {
    link: LinkStateCell,
    axes: [AxisHandle; 2],
    sensors: [Arc<dyn DigitalInput>; 2],
    accessories: Arc<AccessoryState>,
    controller_temp: Mutex<Option<f32>>,
    rehome_requested: AtomicBool,
    shutdown: Shutdown,
}

impl SharedContext {
    pub fn new(
        scales: [AxisScale; 2],
        sensors: [Arc<dyn DigitalInput>; 2],
        shutdown: Shutdown,
    ) -> Self {
        Self {
            link: LinkStateCell::new(GimbalLinkState::Unknown),
            axes: [
                AxisHandle::new(AxisId::One, scales[0]),
                AxisHandle::new(AxisId::Two, scales[1]),
            ],
            sensors,
            accessories: Arc::new(AccessoryState::default()),
            controller_temp: Mutex::new(None),
            rehome_requested: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn link_state(&self) -> GimbalLinkState {
        self.link.get()
    }

    pub fn apply_link_event(&self, event: LinkEvent) -> GimbalLinkState {
        self.link.apply(event)
    }

    pub fn axis(&self, id: AxisId) -> &AxisHandle {
        &self.axes[id.index()]
    }

    /// Reads a reference sensor; a failed read counts as inactive.
    pub fn read_sensor(&self, id: AxisId) -> bool {
        self.sensors[id.index()].is_active().unwrap_or_else(|e| {
            warn!("Failed to read sensor of axis {}: {}", id, e);
            false
        })
    }

    pub fn accessories(&self) -> &Arc<AccessoryState> {
        &self.accessories
    }

    pub fn laser_on(&self) -> bool {
        self.accessories.laser_on.load(Ordering::SeqCst)
    }

    pub fn set_controller_temp(&self, celsius: Option<f32>) {
        *self
            .controller_temp
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = celsius;
    }

    pub fn controller_temp(&self) -> Option<f32> {
        *self
            .controller_temp
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn request_rehome(&self) {
        self.rehome_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_rehome_request(&self) -> bool {
        self.rehome_requested.swap(false, Ordering::SeqCst)
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            axis1_degrees: self.axes[0].degrees(),
            axis2_degrees: self.axes[1].degrees(),
            laser_on: self.laser_on(),
            link_state: self.link_state(),
            sensor1: self.read_sensor(AxisId::One),
            sensor2: self.read_sensor(AxisId::Two),
        }
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        let status = self.status_report();

        TelemetrySnapshot {
            axis1_degrees: status.axis1_degrees,
            axis2_degrees: status.axis2_degrees,
            laser_on: status.laser_on,
            sensor1: status.sensor1,
            sensor2: status.sensor2,
            link_state: status.link_state,
            controller_temp_celsius: self.controller_temp(),
            fan_on: self.accessories.fan_on.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::FixedInput;

    fn handle() -> AxisHandle {
        AxisHandle::new(AxisId::One, AxisScale::new(200, 0.25, 0.2))
    }

    #[test]
    fn requests_are_drained_once() {
        let axis = handle();
        assert_eq!(axis.take_requests(), AxisRequests::default());

        axis.request_move(10);
        axis.request_move(25);
        axis.request_outputs(false);

        assert_eq!(
            axis.take_requests(),
            AxisRequests {
                target: Some(25),
                stop: false,
                outputs: Some(false),
            }
        );
        assert_eq!(axis.take_requests(), AxisRequests::default());
    }

    #[test]
    fn latest_of_move_and_stop_wins() {
        let axis = handle();

        axis.request_move(10);
        axis.request_stop();
        assert_eq!(
            axis.take_requests(),
            AxisRequests {
                target: None,
                stop: true,
                outputs: None,
            }
        );

        axis.request_stop();
        axis.request_move(-5);
        assert_eq!(axis.take_requests().target, Some(-5));
    }

    #[test]
    fn status_reflects_published_state() {
        let context = SharedContext::new(
            [AxisScale::new(200, 0.25, 0.2), AxisScale::new(200, 0.25, 0.25)],
            [Arc::new(FixedInput(true)), Arc::new(FixedInput(false))],
            Shutdown::new(),
        );

        context.axis(AxisId::Two).publish_position(100);
        context.apply_link_event(LinkEvent::HomingStarted);

        let status = context.status_report();
        assert_eq!(status.axis1_degrees, 0.0);
        assert!((status.axis2_degrees - 11.25).abs() < 1e-9);
        assert!(status.sensor1);
        assert!(!status.sensor2);
        assert_eq!(status.link_state, GimbalLinkState::Homing);
    }
}
