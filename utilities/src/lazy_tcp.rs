use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// TCP connection that is only opened when needed and dropped after any
/// failed exchange, so that a late reply can never be read as the answer to
/// the next request.
pub struct LazyTcpStream {
    addr: String,
    stream: Option<TcpStream>,
    max_retries: u32,
    read_timeout: Duration,
    write_timeout: Duration,
    connect_timeout: Duration,
}

impl LazyTcpStream {
    pub fn new(
        addr: impl Into<String>,
        max_retries: u32,
        read_timeout: Duration,
        write_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        LazyTcpStream {
            addr: addr.into(),
            stream: None,
            max_retries,
            read_timeout,
            write_timeout,
            connect_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        self.addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Address {} did not resolve", self.addr),
            )
        })
    }

    fn connect(&mut self) -> io::Result<()> {
        let addr = self.resolve()?;

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    stream.set_nodelay(true)?;

                    debug!("Connected to {} on attempt {}", addr, attempt + 1);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| io::Error::other("Max connection retries reached")))
    }

    fn ensure_connected(&mut self) -> io::Result<&mut TcpStream> {
        if self.stream.is_none() {
            self.connect()?;
        }

        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Not connected"))
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn reconnect(&mut self) -> io::Result<()> {
        self.disconnect();
        self.connect()
    }

    /// Sends one newline-terminated request and reads one newline-terminated
    /// reply. Read timeouts are reported as [`io::ErrorKind::TimedOut`].
    pub fn request_line(&mut self, request: &str) -> io::Result<String> {
        let result = self.exchange(request);

        if result.is_err() {
            self.disconnect();
        }

        result.map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock => io::Error::new(io::ErrorKind::TimedOut, e),
            _ => e,
        })
    }

    fn exchange(&mut self, request: &str) -> io::Result<String> {
        let stream = self.ensure_connected()?;

        stream.write_all(request.trim_end().as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut reply = Vec::new();
        let mut buffer = [0; 512];
        loop {
            let n = stream.read(&mut buffer)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Connection closed before reply",
                ));
            }

            reply.extend_from_slice(&buffer[..n]);
            if let Some(end) = reply.iter().position(|&b| b == b'\n') {
                reply.truncate(end);
                break;
            }
        }

        String::from_utf8(reply).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    fn stream_to(addr: SocketAddr) -> LazyTcpStream {
        LazyTcpStream::new(
            addr.to_string(),
            0,
            Duration::from_millis(100),
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn echoes_one_line_per_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut writer = socket.try_clone().unwrap();
            let reader = BufReader::new(socket);
            for line in reader.lines().take(2) {
                let line = line.unwrap();
                writer.write_all(format!("echo {}\n", line).as_bytes()).unwrap();
            }
        });

        let mut stream = stream_to(addr);
        assert!(!stream.is_connected());
        assert_eq!(stream.request_line("one").unwrap(), "echo one");
        assert_eq!(stream.request_line("two\n").unwrap(), "echo two");
        assert!(stream.is_connected());

        server.join().unwrap();
    }

    #[test]
    fn silent_peer_times_out_and_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_millis(300));
            drop(socket);
        });

        let mut stream = stream_to(addr);
        let err = stream.request_line("hello").unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(!stream.is_connected());

        server.join().unwrap();
    }

    #[test]
    fn unreachable_peer_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut stream = stream_to(addr);
        assert!(stream.request_line("hello").is_err());
        assert!(!stream.is_connected());
    }
}
