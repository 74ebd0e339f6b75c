use std::io;

use utilities::command_executor::Command;

use crate::command_executor::gimbal_link::GimbalLinkHandler;

#[derive(Debug, Clone)]
pub enum LinkCommand {
    Request(String),
    Reconnect,
}

#[derive(Debug)]
pub enum LinkResponse {
    Reply(String),
    Ok,
}

impl Command for LinkCommand {
    type Response = LinkResponse;
    type Handler = GimbalLinkHandler;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response> {
        match self {
            LinkCommand::Request(line) => handler.request(&line).map(LinkResponse::Reply),
            LinkCommand::Reconnect => {
                handler.reconnect()?;
                Ok(LinkResponse::Ok)
            }
        }
    }
}
