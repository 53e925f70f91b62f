pub mod executor;
pub mod link;
pub mod messages;
#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::errors::CommunicationError;
use crate::notify::{Headline, Notify, Severity};
use link::{SerialLink, Transport};
use messages::{Command, Response, Speeds};

/// Reads spent waiting for the controller to report stopped motors. Every read
/// can block for [`link::READ_TIMEOUT`].
pub const STOP_POLL_LIMIT: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde_derive::Serialize)]
pub enum DeviceMode {
    Idle,
    Running,
    Pausing,
    /// Paused, a resume continues with the last speeds.
    Stopped,
    Watering,
    Unknown,
}
impl DeviceMode {
    /// The firmware only answers a stop request with `Stopped` when motors were turning.
    const fn awaits_stop(self) -> bool {
        matches!(self, DeviceMode::Running | DeviceMode::Pausing | DeviceMode::Unknown)
    }
}
impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceMode::Idle => "idle",
            DeviceMode::Running => "running",
            DeviceMode::Pausing => "pausing",
            DeviceMode::Stopped => "paused",
            DeviceMode::Watering => "watering",
            DeviceMode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WateringStatus {
    Started,
    /// The previous cycle is still draining, the request was ignored.
    StillPumping,
}

/// The motor controller at the other end of a [`SerialLink`].
pub struct Clinostat {
    link: SerialLink,
    mode: DeviceMode,
    notifier: Arc<dyn Notify>,
}

impl Clinostat {
    pub fn new(link: SerialLink, notifier: Arc<dyn Notify>) -> Self {
        Clinostat {
            link,
            mode: DeviceMode::Unknown,
            notifier,
        }
    }

    /// Opens `port_name` and performs the connect handshake on it.
    pub fn open(port_name: &str, notifier: Arc<dyn Notify>) -> Result<Self, CommunicationError> {
        let link = SerialLink::open(port_name)?;
        let mut device = Self::new(link, notifier);
        device.handshake()?;
        Ok(device)
    }

    /// Checks whether a clinostat answers on `port_name` without keeping the port.
    pub fn probe(port_name: &str) -> bool {
        match link::open_port(port_name) {
            Ok(port) => Self::probe_transport(port),
            Err(err) => {
                debug!("Probe of {port_name} failed: {err}");
                false
            }
        }
    }

    /// Probe on an already opened transport. The transport is dropped without
    /// a disconnect, so the controller state is left as it was.
    pub fn probe_transport<T: Transport>(mut transport: T) -> bool {
        let connect = match Command::Connect.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Failed to encode connect: {err}");
                return false;
            }
        };
        if let Err(err) = transport.write_all(&connect).and_then(|()| transport.flush()) {
            debug!("Probe write failed: {err}");
            return false;
        }
        let mut buf = [0u8; 1];
        match transport.read_exact(&mut buf) {
            Ok(()) => Response::from(buf[0]) == Response::Connected,
            Err(err) => {
                debug!("Probe read failed: {err}");
                false
            }
        }
    }

    /// Says hello, then asks for the motor state so that the first stop
    /// request knows whether a `Stopped` byte will follow.
    pub fn handshake(&mut self) -> Result<DeviceMode, CommunicationError> {
        self.send(Command::Connect)?;
        self.expect_response(Response::Connected)?;
        self.notify_response(Response::Connected);
        self.echo()
    }

    pub const fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn port_name(&self) -> &str {
        self.link.port_name()
    }

    pub fn echo(&mut self) -> Result<DeviceMode, CommunicationError> {
        self.send(Command::Echo)?;
        let response = self.receive()?;
        let mode = match response {
            Response::RunningState => DeviceMode::Running,
            Response::IdleState => DeviceMode::Idle,
            Response::StoppingState => DeviceMode::Pausing,
            other => {
                warn!("Echo answered with {other:?}");
                DeviceMode::Unknown
            }
        };
        self.mode = mode;
        self.notify_response(response);
        Ok(mode)
    }

    pub fn run(&mut self, speeds: impl Into<Speeds>) -> Result<(), CommunicationError> {
        let speeds = speeds.into();
        debug!("Run at {} / {} rpm", speeds.chamber_rpm, speeds.frame_rpm);
        self.send(Command::Run(speeds))?;
        self.expect_response(Response::Starting)?;
        self.mode = DeviceMode::Running;
        self.notify_response(Response::Starting);
        Ok(())
    }

    pub fn abort(&mut self) -> Result<(), CommunicationError> {
        self.send(Command::Abort)?;
        if self.mode.awaits_stop() {
            self.await_stopped()?;
        }
        self.mode = DeviceMode::Idle;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), CommunicationError> {
        self.send(Command::Pause)?;
        if self.mode.awaits_stop() {
            self.await_stopped()?;
            self.mode = DeviceMode::Stopped;
        }
        Ok(())
    }

    /// Continues with the last speeds. Nothing is read back.
    pub fn resume(&mut self) -> Result<(), CommunicationError> {
        self.send(Command::Resume)?;
        self.mode = DeviceMode::Running;
        self.notifier.notify(Headline::Controller, Severity::Info, "Resuming run.");
        Ok(())
    }

    pub fn home(&mut self) -> Result<(), CommunicationError> {
        // TODO: send Command::Home once the firmware answers it with a status byte.
        debug!("Homing is not supported by the controller firmware yet");
        Ok(())
    }

    pub fn dump_water(&mut self, volume_ml: f32) -> Result<WateringStatus, CommunicationError> {
        self.send(Command::DumpWater(volume_ml))?;
        let response = self.receive()?;
        let status = match response {
            Response::PumpingStarted => {
                if self.mode == DeviceMode::Idle {
                    self.mode = DeviceMode::Watering;
                }
                WateringStatus::Started
            }
            Response::StillPumping => WateringStatus::StillPumping,
            other => {
                return Err(CommunicationError::UnexpectedResponse {
                    expected: Response::PumpingStarted,
                    received: other,
                });
            }
        };
        self.notify_response(response);
        Ok(status)
    }

    pub fn disconnect(&mut self) {
        self.link.close();
    }

    /// Lets go of the port without saying goodbye, the controller keeps doing
    /// whatever it was told last.
    pub fn release(&mut self) {
        self.link.release();
    }

    fn send(&mut self, command: Command) -> Result<(), CommunicationError> {
        let frame = command.encode()?;
        self.link.clear_input()?;
        self.link.write(&frame)
    }

    fn receive(&mut self) -> Result<Response, CommunicationError> {
        Ok(Response::from(self.link.read_byte()?))
    }

    fn expect_response(&mut self, expected: Response) -> Result<(), CommunicationError> {
        let received = self.receive()?;
        if received != expected {
            return Err(CommunicationError::UnexpectedResponse { expected, received });
        }
        Ok(())
    }

    /// Reads until the controller reports stopped motors. A silent read counts
    /// against [`STOP_POLL_LIMIT`] like any other byte; other faults end the wait.
    fn await_stopped(&mut self) -> Result<(), CommunicationError> {
        for attempt in 1..=STOP_POLL_LIMIT {
            match self.link.read_byte() {
                Ok(byte) => match Response::from(byte) {
                    Response::Stopped => {
                        self.notify_response(Response::Stopped);
                        return Ok(());
                    }
                    Response::Stopping => {
                        self.mode = DeviceMode::Pausing;
                        self.notify_response(Response::Stopping);
                    }
                    other => debug!("Ignoring {other:?} while waiting for stop ({attempt}/{STOP_POLL_LIMIT})"),
                },
                Err(CommunicationError::Timeout) => {
                    debug!("Still waiting for motors to stop ({attempt}/{STOP_POLL_LIMIT})");
                }
                Err(err) => return Err(err),
            }
        }
        Err(CommunicationError::NoStopConfirmation(STOP_POLL_LIMIT))
    }

    fn notify_response(&self, response: Response) {
        self.notifier.notify(Headline::Controller, Severity::Info, response.text());
    }
}
