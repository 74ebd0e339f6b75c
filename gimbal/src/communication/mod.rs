pub mod commands;
pub mod service;
pub mod telemetry;
