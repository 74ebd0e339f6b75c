use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    context::{AxisHandle, SharedContext},
    error::GimbalError,
    models::{AxisId, AxisScale, GimbalLinkState, MAX_TARGET_STEPS},
};

/// One gimbal axis, whether driven in-process or over the network.
#[async_trait]
pub trait Axis: Send + Sync {
    fn id(&self) -> AxisId;

    fn scale(&self) -> AxisScale;

    /// Last known position in steps from the homed zero.
    fn current_position(&self) -> i64;

    fn link_state(&self) -> GimbalLinkState;

    /// Requests an absolute move. Returns once the request is accepted, not
    /// when the axis arrives.
    async fn move_to_degrees(&self, degrees: f64) -> Result<(), GimbalError>;

    async fn move_to(&self, steps: i64) -> Result<(), GimbalError> {
        self.move_to_degrees(self.scale().target_degrees(steps)).await
    }

    async fn stop(&self) -> Result<(), GimbalError>;

    async fn set_enabled(&self, on: bool) -> Result<(), GimbalError>;

    fn current_degrees(&self) -> f64 {
        self.scale().to_degrees(self.current_position())
    }
}

/// Axis served by the motion loop of this process.
pub struct LocalAxis {
    handle: AxisHandle,
    context: Arc<SharedContext>,
}

impl LocalAxis {
    pub fn new(id: AxisId, context: Arc<SharedContext>) -> Self {
        Self {
            handle: context.axis(id).clone(),
            context,
        }
    }

    fn ensure_ready(&self) -> Result<(), GimbalError> {
        let state = self.context.link_state();
        if state.is_ready() {
            Ok(())
        } else {
            Err(GimbalError::NotReady(state.to_string()))
        }
    }
}

#[async_trait]
impl Axis for LocalAxis {
    fn id(&self) -> AxisId {
        self.handle.id()
    }

    fn scale(&self) -> AxisScale {
        self.handle.scale()
    }

    fn current_position(&self) -> i64 {
        self.handle.position()
    }

    fn link_state(&self) -> GimbalLinkState {
        self.context.link_state()
    }

    async fn move_to_degrees(&self, degrees: f64) -> Result<(), GimbalError> {
        let steps = self.scale().checked_steps(degrees).ok_or_else(|| {
            GimbalError::Malformed("position_degrees out of range".to_string())
        })?;
        self.move_to(steps).await
    }

    async fn move_to(&self, steps: i64) -> Result<(), GimbalError> {
        if !(-MAX_TARGET_STEPS..=MAX_TARGET_STEPS).contains(&steps) {
            return Err(GimbalError::Malformed(format!(
                "target {} is out of range",
                steps
            )));
        }
        self.ensure_ready()?;
        self.handle.request_move(steps);
        Ok(())
    }

    async fn stop(&self) -> Result<(), GimbalError> {
        self.handle.request_stop();
        Ok(())
    }

    async fn set_enabled(&self, on: bool) -> Result<(), GimbalError> {
        self.ensure_ready()?;
        self.handle.request_outputs(on);
        Ok(())
    }
}
