pub mod axis_controller;
pub mod homing;
pub mod motion_loop;
