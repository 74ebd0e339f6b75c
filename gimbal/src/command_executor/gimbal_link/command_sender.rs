use std::{io, time::Duration};

use tracing::{debug, warn};
use utilities::command_executor::CommandSender;

use super::commands::{LinkCommand, LinkResponse};
use crate::communication::commands::{GimbalCommand, Reply};

/// Async front of the gimbal command channel. Every failure is folded into
/// an error [`Reply`] so callers handle one shape.
#[derive(Clone)]
pub struct GimbalCommandSender {
    sender: CommandSender<LinkCommand>,
    timeout: Duration,
}

impl GimbalCommandSender {
    /// `timeout` bounds each socket operation; a queued request may wait for
    /// the send and the receive of the one ahead of it.
    pub fn new(sender: CommandSender<LinkCommand>, timeout: Duration) -> Self {
        Self { sender, timeout }
    }

    pub async fn send(&self, command: &GimbalCommand) -> Reply {
        let line = command.to_line();
        debug!("-> {}", line);

        let response = self
            .sender
            .send_command_timeout(LinkCommand::Request(line), self.timeout * 3)
            .await;

        match response {
            Ok(LinkResponse::Reply(reply)) => {
                debug!("<- {}", reply);
                serde_json::from_str(&reply).unwrap_or_else(|e| {
                    warn!("Undecodable reply {:?}: {}", reply, e);
                    Reply::error(format!("invalid reply: {}", e))
                })
            }
            Ok(LinkResponse::Ok) => Reply::error("unexpected response"),
            Err(e) if is_timeout(&e) => Reply::timeout(),
            Err(e) => Reply::error(e.to_string()),
        }
    }

    pub async fn reconnect(&self) -> io::Result<()> {
        self.sender.send_command(LinkCommand::Reconnect).await?;
        Ok(())
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
