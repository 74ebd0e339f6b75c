use crate::{controller::homing::HomingPhase, models::AxisId};

#[derive(Debug, thiserror::Error)]
pub enum GimbalError {
    #[error("timeout")]
    CommandTimeout,

    #[error("gimbal link lost")]
    LinkLost,

    #[error("unknown command")]
    UnknownCommand,

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("gimbal is not ready ({0})")]
    NotReady(String),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HomingError {
    #[error("axis {axis}: reference sensor not found during {phase:?}")]
    SensorNotFound { axis: AxisId, phase: HomingPhase },

    #[error("axis {axis}: homing interrupted by shutdown")]
    Interrupted { axis: AxisId },
}
