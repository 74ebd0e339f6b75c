use std::time::Duration;

pub mod accessory;
pub mod gimbal_link;

pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
pub const MAX_CONNECT_RETRIES: u32 = 0;
