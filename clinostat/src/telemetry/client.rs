use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use clinowire::frame;
use log::trace;

use crate::errors::TelemetryError;
use crate::telemetry::messages::{ControlMessage, TelemetryMessage};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Chamber side of the telemetry exchange: one connection per reading.
#[derive(Debug, Clone)]
pub struct ChamberClient {
    address: SocketAddr,
    timeout: Duration,
}

impl ChamberClient {
    pub const fn new(address: SocketAddr) -> Self {
        ChamberClient {
            address,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Resolves `host` and keeps the first address found.
    pub fn resolve(host: &str, port: u16) -> Result<Self, TelemetryError> {
        match (host, port).to_socket_addrs()?.next() {
            Some(address) => Ok(Self::new(address)),
            None => Err(std::io::Error::new(ErrorKind::NotFound, format!("{host} did not resolve")).into()),
        }
    }

    /// Applies to connecting, sending and waiting for the reply separately.
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    /// Sends `message` and returns what the server wants the chamber to do.
    pub fn exchange(&self, message: &TelemetryMessage) -> Result<ControlMessage, TelemetryError> {
        let mut stream = TcpStream::connect_timeout(&self.address, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        frame::write_frame(&mut stream, message.as_str())?;
        let reply = frame::decode(&mut stream)?;
        trace!("{} answered {reply:?}", self.address);
        reply.parse()
    }
}
