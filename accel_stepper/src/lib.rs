pub mod clock;
pub mod kinematics;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use kinematics::{AxisKinematics, Direction};
