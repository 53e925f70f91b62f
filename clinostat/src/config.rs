use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, serde_derive::Deserialize)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub telemetry: TelemetryConfig,
    pub watering: WateringConfig,
}

#[derive(Debug, Clone, Default, serde_derive::Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port used when none is given on the command line.
    pub port: Option<String>,
}

#[derive(Debug, Clone, serde_derive::Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    #[serde(alias = "IP")]
    pub address: String,
    #[serde(alias = "PORT")]
    pub port: u16,
    /// Readings kept for the consumer before new ones are dropped.
    pub inbound_capacity: usize,
    pub client_timeout_ms: u64,
}
impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8888,
            inbound_capacity: 4096,
            client_timeout_ms: 10_000,
        }
    }
}
impl TelemetryConfig {
    pub const fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

#[derive(Debug, Clone, serde_derive::Deserialize)]
#[serde(default)]
pub struct WateringConfig {
    pub volume_ml: f32,
}
impl Default for WateringConfig {
    fn default() -> Self {
        Self { volume_ml: 10.0 }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }
}
