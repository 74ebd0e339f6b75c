use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    axis::Axis,
    client::telemetry::TelemetryMirror,
    command_executor::gimbal_link::command_sender::GimbalCommandSender,
    communication::commands::GimbalCommand,
    error::GimbalError,
    models::{AxisId, AxisScale, GimbalLinkState},
};

/// Axis proxy over the network. Positions come from the telemetry mirror,
/// commands go through the command channel.
pub struct RemoteAxis {
    id: AxisId,
    scale: AxisScale,
    sender: GimbalCommandSender,
    mirror: Arc<TelemetryMirror>,
}

impl RemoteAxis {
    pub fn new(
        id: AxisId,
        scale: AxisScale,
        sender: GimbalCommandSender,
        mirror: Arc<TelemetryMirror>,
    ) -> Self {
        Self {
            id,
            scale,
            sender,
            mirror,
        }
    }

    async fn send(&self, command: GimbalCommand) -> Result<(), GimbalError> {
        if self.mirror.link_state() == GimbalLinkState::NotFound {
            return Err(GimbalError::LinkLost);
        }
        self.sender.send(&command).await.into_result().map(|_| ())
    }
}

#[async_trait]
impl Axis for RemoteAxis {
    fn id(&self) -> AxisId {
        self.id
    }

    fn scale(&self) -> AxisScale {
        self.scale
    }

    fn current_position(&self) -> i64 {
        (self.current_degrees() / self.scale.degrees_per_step()).round() as i64
    }

    fn current_degrees(&self) -> f64 {
        self.mirror
            .latest()
            .map(|snapshot| snapshot.degrees(self.id))
            .unwrap_or_default()
    }

    fn link_state(&self) -> GimbalLinkState {
        self.mirror.link_state()
    }

    async fn move_to_degrees(&self, degrees: f64) -> Result<(), GimbalError> {
        self.send(GimbalCommand::Move {
            axis: self.id,
            position_degrees: degrees,
        })
        .await
    }

    async fn stop(&self) -> Result<(), GimbalError> {
        self.send(GimbalCommand::Stop { axis: self.id }).await
    }

    async fn set_enabled(&self, on: bool) -> Result<(), GimbalError> {
        self.send(GimbalCommand::Enable { axis: self.id, on }).await
    }
}
