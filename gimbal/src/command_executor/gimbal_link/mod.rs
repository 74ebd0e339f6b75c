use std::io;

use commands::LinkCommand;
use utilities::{command_executor::DeviceHandler, lazy_tcp::LazyTcpStream};

pub mod command_sender;
pub mod commands;

/// Client end of the command channel. One request in flight at a time.
pub struct GimbalLinkHandler {
    tcp_stream: LazyTcpStream,
}

impl DeviceHandler for GimbalLinkHandler {
    type Command = LinkCommand;
}

impl GimbalLinkHandler {
    pub fn new(tcp_stream: LazyTcpStream) -> Self {
        Self { tcp_stream }
    }

    pub fn request(&mut self, line: &str) -> io::Result<String> {
        self.tcp_stream.request_line(line)
    }

    pub fn reconnect(&mut self) -> io::Result<()> {
        self.tcp_stream.reconnect()
    }
}
