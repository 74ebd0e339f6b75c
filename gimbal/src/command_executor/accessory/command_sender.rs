use std::{io, time::Duration};

use utilities::command_executor::CommandSender;

use super::commands::{AccessoryCommand, AccessoryResponse};

#[derive(Clone)]
pub struct AccessoryCommandSender {
    sender: CommandSender<AccessoryCommand>,
}

impl AccessoryCommandSender {
    pub fn new(sender: CommandSender<AccessoryCommand>) -> Self {
        Self { sender }
    }

    pub async fn set_laser(&self, on: bool) -> io::Result<()> {
        self.expect_ok(AccessoryCommand::SetLaser(on)).await
    }

    pub async fn set_fan(&self, on: bool) -> io::Result<()> {
        self.expect_ok(AccessoryCommand::SetFan(on)).await
    }

    /// Returns `false` if a spray was already in progress.
    pub async fn spray(&self, duration: Duration) -> io::Result<bool> {
        let response = self
            .sender
            .send_command(AccessoryCommand::Spray(duration))
            .await?;

        Ok(response == AccessoryResponse::Ok)
    }

    pub async fn all_off(&self) -> io::Result<()> {
        self.expect_ok(AccessoryCommand::AllOff).await
    }

    async fn expect_ok(&self, command: AccessoryCommand) -> io::Result<()> {
        match self.sender.send_command(command).await? {
            AccessoryResponse::Ok => Ok(()),
            other => Err(io::Error::other(format!(
                "Unexpected response: {:?}",
                other
            ))),
        }
    }
}
