pub mod axis;
pub mod client;
pub mod command_executor;
pub mod communication;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod models;
pub mod server;
pub mod state_monitor;
