use std::io::ErrorKind;
use std::num::ParseFloatError;

use thiserror::Error;

use crate::device::messages::Response;

/// Anything that went wrong while talking to the motor controller.
///
/// Recoverable at the process level: whoever owns the device drops it and
/// goes back to the disconnected state.
#[derive(Error, Debug)]
pub enum CommunicationError {
    #[error("Device cannot be reached, check the USB cable: {0}")]
    Io(std::io::Error),

    #[error("Device did not respond")]
    Timeout,

    #[error("Device closed the connection")]
    Disconnected,

    #[error("Serial port is not open")]
    NotOpen,

    #[error("No device is connected")]
    NotConnected,

    #[error("Failed to open serial port: {0}")]
    Open(#[from] serialport::Error),

    #[error("Received incorrect response: expected {expected:?}, got {received:?}")]
    UnexpectedResponse { expected: Response, received: Response },

    #[error("Device did not report stopped motors after {0} reads")]
    NoStopConfirmation(u32),

    #[error("Failed to encode command: {0}")]
    Encode(#[from] clinowire::SerializeError),

    #[error("Command panicked while holding the serial link")]
    Panicked,
}

impl From<std::io::Error> for CommunicationError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => CommunicationError::Timeout,
            ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe | ErrorKind::NotConnected => CommunicationError::Disconnected,
            _ => CommunicationError::Io(err),
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerStartupError {
    #[error("Failed to bind telemetry server to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Telemetry server is already running")]
    AlreadyRunning,

    #[error("Failed to spawn the accept loop: {0}")]
    Spawn(std::io::Error),
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid sensor value {value:?}: {source}")]
    InvalidValue {
        value: String,
        source: ParseFloatError,
    },

    #[error("Expected between 6 and 10 sensor values, got {0}")]
    Arity(usize),

    #[error("Invalid control message {0:?}")]
    InvalidControl(String),

    #[error("Light intensity {0} is outside of 0..=100")]
    IntensityOutOfRange(u32),

    #[error("Frame error: {0}")]
    Frame(#[from] clinowire::frame::FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed with config parsing: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let timeout: CommunicationError = std::io::Error::from(ErrorKind::TimedOut).into();
        assert!(matches!(timeout, CommunicationError::Timeout));
        let eof: CommunicationError = std::io::Error::from(ErrorKind::UnexpectedEof).into();
        assert!(matches!(eof, CommunicationError::Disconnected));
        let other: CommunicationError = std::io::Error::from(ErrorKind::PermissionDenied).into();
        assert!(matches!(other, CommunicationError::Io(_)));
    }
}
