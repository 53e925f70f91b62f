use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, info, trace};

use crate::device::messages::Command;
use crate::errors::CommunicationError;

pub const BAUD_RATE: u32 = 57_600;
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte stream a [`SerialLink`] runs on. Reads must give up with
/// `ErrorKind::TimedOut` once [`READ_TIMEOUT`] has passed without data.
pub trait Transport: Read + Write + Send {
    /// Drops bytes the device sent that nobody asked for.
    fn clear_input(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for Box<dyn serialport::SerialPort> {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.clear(serialport::ClearBuffer::Input).map_err(std::io::Error::from)
    }
}

pub(crate) fn open_port(port_name: &str) -> Result<Box<dyn serialport::SerialPort>, CommunicationError> {
    let port = serialport::new(port_name, BAUD_RATE).timeout(READ_TIMEOUT).open()?;
    Ok(port)
}

/// Owns the one open handle to the controller. Every fault on the handle comes
/// back as a [`CommunicationError`].
pub struct SerialLink {
    port_name: String,
    port: Option<Box<dyn Transport>>,
}

impl SerialLink {
    pub fn open(port_name: &str) -> Result<Self, CommunicationError> {
        let port = open_port(port_name)?;
        info!("Opened serial port {port_name} at {BAUD_RATE} baud");
        Ok(Self::from_transport(port_name, port))
    }

    pub fn from_transport<T: Transport + 'static>(port_name: impl Into<String>, transport: T) -> Self {
        SerialLink {
            port_name: port_name.into(),
            port: Some(Box::new(transport)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    pub fn clear_input(&mut self) -> Result<(), CommunicationError> {
        match self.port.as_mut() {
            Some(port) => Ok(port.clear_input()?),
            None => Err(CommunicationError::NotOpen),
        }
    }

    /// Sends `bytes` with a single write call, a frame never goes out in pieces.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), CommunicationError> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Err(CommunicationError::NotOpen),
        };
        trace!("{} <- {bytes:02x?}", self.port_name);
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, CommunicationError> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Err(CommunicationError::NotOpen),
        };
        let mut buf = vec![0u8; n];
        port.read_exact(&mut buf)?;
        trace!("{} -> {buf:02x?}", self.port_name);
        Ok(buf)
    }

    pub fn read_byte(&mut self) -> Result<u8, CommunicationError> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Err(CommunicationError::NotOpen),
        };
        let mut buf = [0u8; 1];
        port.read_exact(&mut buf)?;
        trace!("{} -> {:02x}", self.port_name, buf[0]);
        Ok(buf[0])
    }

    /// Tells the controller we are leaving, then releases the handle.
    /// Neither step can fail from the caller's point of view. Safe to call twice.
    pub fn close(&mut self) {
        let Some(mut port) = self.port.take() else {
            return;
        };
        match Command::Disconnect.encode() {
            Ok(bytes) => {
                if let Err(err) = port.write_all(&bytes).and_then(|()| port.flush()) {
                    debug!("Failed to send disconnect to {}: {err}", self.port_name);
                }
            }
            Err(err) => debug!("Failed to encode disconnect: {err}"),
        }
        drop(port);
        info!("Closed serial port {}", self.port_name);
    }

    /// Releases the handle without sending Disconnect, which the firmware
    /// treats as an abort. Safe to call twice.
    pub fn release(&mut self) {
        if self.port.take().is_some() {
            info!("Released serial port {}", self.port_name);
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::ScriptedPort;

    #[test]
    fn write_goes_out_in_one_piece() {
        let port = ScriptedPort::new();
        let mut link = SerialLink::from_transport("mock", port.clone());
        link.write(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(port.writes(), vec![vec![0x01, 0x02, 0x03]]);
    }

    #[test]
    fn silent_device_times_out() {
        let port = ScriptedPort::new();
        let mut link = SerialLink::from_transport("mock", port.clone());
        assert!(matches!(link.read_byte(), Err(CommunicationError::Timeout)));
        port.reply(&[0x05]);
        assert!(matches!(link.read(2), Err(CommunicationError::Timeout)));
    }

    #[test]
    fn unplugged_device_is_a_communication_error() {
        let port = ScriptedPort::new();
        let mut link = SerialLink::from_transport("mock", port.clone());
        port.unplug();
        assert!(matches!(link.write(&[0x06]), Err(CommunicationError::Io(_))));
        assert!(matches!(link.read_byte(), Err(CommunicationError::Io(_))));
    }

    #[test]
    fn close_sends_disconnect_once() {
        let port = ScriptedPort::new();
        let mut link = SerialLink::from_transport("mock", port.clone());
        link.close();
        link.close();
        drop(link);
        assert_eq!(port.writes(), vec![vec![0x08]]);
    }

    #[test]
    fn release_stays_silent() {
        let port = ScriptedPort::new();
        let mut link = SerialLink::from_transport("mock", port.clone());
        link.release();
        assert!(!link.is_open());
        drop(link);
        assert!(port.writes().is_empty());
    }

    #[test]
    fn close_swallows_write_failures() {
        let port = ScriptedPort::new();
        let mut link = SerialLink::from_transport("mock", port.clone());
        port.unplug();
        link.close();
        assert!(!link.is_open());
        assert!(matches!(link.write(&[0x06]), Err(CommunicationError::NotOpen)));
    }
}
