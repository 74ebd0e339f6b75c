use std::{io, time::Duration};

use utilities::command_executor::Command;

use crate::command_executor::accessory::AccessoryHandler;

#[derive(Debug, Clone)]
pub enum AccessoryCommand {
    SetLaser(bool),
    SetFan(bool),
    Spray(Duration),
    AllOff,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AccessoryResponse {
    Ok,
    /// A spray was already running.
    Busy,
}

impl Command for AccessoryCommand {
    type Response = AccessoryResponse;
    type Handler = AccessoryHandler;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response> {
        match self {
            AccessoryCommand::SetLaser(on) => {
                handler.set_laser(on)?;
                Ok(AccessoryResponse::Ok)
            }
            AccessoryCommand::SetFan(on) => {
                handler.set_fan(on)?;
                Ok(AccessoryResponse::Ok)
            }
            AccessoryCommand::Spray(duration) => {
                if handler.spray(duration)? {
                    Ok(AccessoryResponse::Ok)
                } else {
                    Ok(AccessoryResponse::Busy)
                }
            }
            AccessoryCommand::AllOff => {
                handler.all_off()?;
                Ok(AccessoryResponse::Ok)
            }
        }
    }
}
