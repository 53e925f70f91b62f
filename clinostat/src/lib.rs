//! Control core of a two-axis clinostat: the serial protocol of its motor
//! controller and the TCP exchange with the sensor chamber riding on it.

pub mod config;
pub mod device;
pub mod errors;
pub mod notify;
pub mod telemetry;

pub use config::Config;
pub use device::executor::CommandExecutor;
pub use device::link::{SerialLink, Transport};
pub use device::messages::{Command, Response, Speeds};
pub use device::{Clinostat, DeviceMode, WateringStatus};
pub use errors::{CommunicationError, ConfigError, ServerStartupError, TelemetryError};
pub use notify::{Headline, LogNotifier, Notify, NullNotifier, Severity};
pub use telemetry::{ChamberClient, ControlMessage, SensorReading, ServerState, TelemetryMessage, TelemetryQueues, TelemetryServer};
