/// Commands understood by the motor controller.
///
/// Declaration order is the wire order: `clinowire` writes the variant position
/// plus one as the opcode, so `Run` is 0x01 and `DumpWater` is 0x09.
#[derive(Debug, Clone, Copy, PartialEq, serde_derive::Serialize)]
pub enum Command {
    Run(Speeds),
    Home,
    Abort,
    Pause,
    Resume,
    Echo,
    Connect,
    Disconnect,
    /// Volume in ml.
    DumpWater(f32),
}
impl Command {
    pub fn encode(&self) -> Result<Vec<u8>, clinowire::SerializeError> {
        clinowire::serialize(self)
    }
}

/// Target speeds of the two axes in RPM, in the order the firmware reads them.
#[derive(Debug, Clone, Copy, PartialEq, serde_derive::Serialize)]
pub struct Speeds {
    pub chamber_rpm: f32,
    pub frame_rpm: f32,
}
impl Speeds {
    pub const fn new(chamber_rpm: f32, frame_rpm: f32) -> Self {
        Self { chamber_rpm, frame_rpm }
    }
}
impl From<(f32, f32)> for Speeds {
    fn from((chamber_rpm, frame_rpm): (f32, f32)) -> Self {
        Self::new(chamber_rpm, frame_rpm)
    }
}

/// Single status byte sent back by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Connected,
    TopSpeed,
    Starting,
    Stopping,
    Stopped,
    RunningState,
    StoppingState,
    IdleState,
    PumpingStarted,
    StillPumping,
    Unrecognized(u8),
}
impl From<u8> for Response {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => Response::Connected,
            0x02 => Response::TopSpeed,
            0x03 => Response::Starting,
            0x04 => Response::Stopping,
            0x05 => Response::Stopped,
            0x06 => Response::RunningState,
            0x07 => Response::StoppingState,
            0x08 => Response::IdleState,
            0x09 => Response::PumpingStarted,
            0x0A => Response::StillPumping,
            other => Response::Unrecognized(other),
        }
    }
}
impl Response {
    pub const fn byte(self) -> u8 {
        match self {
            Response::Connected => 0x01,
            Response::TopSpeed => 0x02,
            Response::Starting => 0x03,
            Response::Stopping => 0x04,
            Response::Stopped => 0x05,
            Response::RunningState => 0x06,
            Response::StoppingState => 0x07,
            Response::IdleState => 0x08,
            Response::PumpingStarted => 0x09,
            Response::StillPumping => 0x0A,
            Response::Unrecognized(byte) => byte,
        }
    }

    pub const fn text(self) -> &'static str {
        match self {
            Response::Connected => "Device connected.",
            Response::TopSpeed => "Motors have reached full speed.",
            Response::Starting => "Starting motors.",
            Response::Stopping => "Stopping motors.",
            Response::Stopped => "Motors have stopped.",
            Response::RunningState => "Device is currently running.",
            Response::StoppingState => "Device is currently stopping.",
            Response::IdleState => "Device is currently idle.",
            Response::PumpingStarted => "Watering started.",
            Response::StillPumping => "Previous watering cycle hasn't finished yet.",
            Response::Unrecognized(_) => "Unknown response.",
        }
    }
}
