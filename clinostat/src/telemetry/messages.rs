use std::fmt;
use std::str::FromStr;

use crate::errors::TelemetryError;

/// Moisture value a chamber sends when no sample was taken this cycle.
pub const MOISTURE_NOT_MEASURED: f64 = -100.0;

const MAX_TEMPERATURES: usize = 3;
const MIN_VALUES: usize = 6;
const MAX_VALUES: usize = MIN_VALUES + MAX_TEMPERATURES + 1;

/// Raw payload of one chamber request, semicolon separated decimals.
/// The server forwards it untouched; see [`SensorReading`] for the parsed form.
#[derive(Debug, Clone, PartialEq, Eq, serde_derive::Serialize)]
#[serde(transparent)]
pub struct TelemetryMessage(String);

impl TelemetryMessage {
    pub fn new(payload: impl Into<String>) -> Self {
        TelemetryMessage(payload.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Every value of the payload, ignoring the trailing newline chambers append.
    pub fn values(&self) -> Result<Vec<f64>, TelemetryError> {
        let payload = self.0.trim();
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        payload
            .split(';')
            .map(|value| {
                let value = value.trim();
                value.parse::<f64>().map_err(|source| TelemetryError::InvalidValue {
                    value: value.to_string(),
                    source,
                })
            })
            .collect()
    }
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TelemetryMessage {
    fn from(payload: String) -> Self {
        TelemetryMessage(payload)
    }
}

/// One cycle of chamber sensors.
#[derive(Debug, Clone, PartialEq, serde_derive::Serialize)]
pub struct SensorReading {
    /// Latest accelerometer sample, x/y/z.
    pub acceleration: [f64; 3],
    /// Running mean of every sample since the chamber connected.
    pub mean_acceleration: [f64; 3],
    pub temperatures: Vec<f64>,
    pub moisture: Option<f64>,
}

impl TryFrom<&TelemetryMessage> for SensorReading {
    type Error = TelemetryError;

    fn try_from(message: &TelemetryMessage) -> Result<Self, Self::Error> {
        let values = message.values()?;
        if !(MIN_VALUES..=MAX_VALUES).contains(&values.len()) {
            return Err(TelemetryError::Arity(values.len()));
        }
        // Anything past the accelerometers ends with the moisture slot.
        let (temperatures, moisture) = match values.split_last() {
            Some((&moisture, rest)) if values.len() > MIN_VALUES => {
                let moisture = (moisture != MOISTURE_NOT_MEASURED).then_some(moisture);
                (rest[MIN_VALUES..].to_vec(), moisture)
            }
            _ => (Vec::new(), None),
        };
        Ok(SensorReading {
            acceleration: [values[0], values[1], values[2]],
            mean_acceleration: [values[3], values[4], values[5]],
            temperatures,
            moisture,
        })
    }
}

impl From<&SensorReading> for TelemetryMessage {
    /// Writes up to three temperatures followed by the moisture slot, which
    /// carries [`MOISTURE_NOT_MEASURED`] when no sample was taken.
    fn from(reading: &SensorReading) -> Self {
        let mut values = Vec::with_capacity(MAX_VALUES);
        values.extend(reading.acceleration);
        values.extend(reading.mean_acceleration);
        values.extend(reading.temperatures.iter().take(MAX_TEMPERATURES));
        values.push(reading.moisture.unwrap_or(MOISTURE_NOT_MEASURED));
        let payload = values.iter().map(f64::to_string).collect::<Vec<_>>().join(";");
        TelemetryMessage(payload + "\n")
    }
}

/// Reply the server sends back to a chamber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde_derive::Serialize)]
pub enum ControlMessage {
    /// Nothing changed since the last contact.
    #[default]
    Default,
    /// Grow light intensities in percent.
    Lights { red: u8, blue: u8 },
}

impl ControlMessage {
    pub const MAX_INTENSITY: u32 = 100;

    pub fn lights(red: u32, blue: u32) -> Result<Self, TelemetryError> {
        Ok(ControlMessage::Lights {
            red: intensity(red)?,
            blue: intensity(blue)?,
        })
    }
}

fn intensity(value: u32) -> Result<u8, TelemetryError> {
    if value > ControlMessage::MAX_INTENSITY {
        return Err(TelemetryError::IntensityOutOfRange(value));
    }
    u8::try_from(value).map_err(|_| TelemetryError::IntensityOutOfRange(value))
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Default => f.write_str("default"),
            ControlMessage::Lights { red, blue } => write!(f, "{red};{blue}"),
        }
    }
}

impl FromStr for ControlMessage {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "default" {
            return Ok(ControlMessage::Default);
        }
        let invalid = || TelemetryError::InvalidControl(s.to_string());
        let Some((red, blue)) = s.split_once(';') else {
            return Err(invalid());
        };
        let red = red.trim().parse::<u32>().map_err(|_| invalid())?;
        let blue = blue.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::lights(red, blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_chamber_line() {
        let message = TelemetryMessage::new("0.1;-9.8;0.3;0.05;-9.7;0.2;21.5;22;21.75;-100\n");
        let reading = SensorReading::try_from(&message).unwrap();
        assert_eq!(reading.acceleration, [0.1, -9.8, 0.3]);
        assert_eq!(reading.mean_acceleration, [0.05, -9.7, 0.2]);
        assert_eq!(reading.temperatures, vec![21.5, 22.0, 21.75]);
        assert_eq!(reading.moisture, None);
    }

    #[test]
    fn moisture_sample_is_kept() {
        let message = TelemetryMessage::new("0;0;1;0;0;1;20;20;20;43.5");
        assert_eq!(SensorReading::try_from(&message).unwrap().moisture, Some(43.5));
    }

    #[test]
    fn accelerometer_only_line() {
        let message = TelemetryMessage::new("1;2;3;4;5;6");
        let reading = SensorReading::try_from(&message).unwrap();
        assert!(reading.temperatures.is_empty());
        assert_eq!(reading.moisture, None);
    }

    #[test]
    fn single_sensor_chamber() {
        let message = TelemetryMessage::new("0;0;1;0;0;1;21.5;-100\n");
        let reading = SensorReading::try_from(&message).unwrap();
        assert_eq!(reading.temperatures, vec![21.5]);
        assert_eq!(reading.moisture, None);

        let message = TelemetryMessage::new("0;0;1;0;0;1;21.5;22;43.5");
        let reading = SensorReading::try_from(&message).unwrap();
        assert_eq!(reading.temperatures, vec![21.5, 22.0]);
        assert_eq!(reading.moisture, Some(43.5));
    }

    #[test]
    fn moisture_without_temperatures() {
        let message = TelemetryMessage::new("0;0;1;0;0;1;12.5");
        let reading = SensorReading::try_from(&message).unwrap();
        assert!(reading.temperatures.is_empty());
        assert_eq!(reading.moisture, Some(12.5));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let short = TelemetryMessage::new("1;2;3");
        assert!(matches!(SensorReading::try_from(&short), Err(TelemetryError::Arity(3))));
        let long = TelemetryMessage::new("1;2;3;4;5;6;7;8;9;10;11");
        assert!(matches!(SensorReading::try_from(&long), Err(TelemetryError::Arity(11))));
    }

    #[test]
    fn garbage_value_is_named() {
        let message = TelemetryMessage::new("1;2;x;4;5;6");
        match SensorReading::try_from(&message) {
            Err(TelemetryError::InvalidValue { value, .. }) => assert_eq!(value, "x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reading_renders_like_a_chamber() {
        let reading = SensorReading {
            acceleration: [0.5, -1.0, 9.75],
            mean_acceleration: [0.25, -0.5, 9.5],
            temperatures: vec![21.0],
            moisture: None,
        };
        let message = TelemetryMessage::from(&reading);
        assert_eq!(message.as_str(), "0.5;-1;9.75;0.25;-0.5;9.5;21;-100\n");
        assert_eq!(SensorReading::try_from(&message).unwrap(), reading);
    }

    #[test]
    fn control_messages() {
        assert_eq!("default".parse::<ControlMessage>().unwrap(), ControlMessage::Default);
        assert_eq!(
            " 50;75\n".parse::<ControlMessage>().unwrap(),
            ControlMessage::Lights { red: 50, blue: 75 }
        );
        assert_eq!(ControlMessage::lights(50, 75).unwrap().to_string(), "50;75");
        assert_eq!(ControlMessage::default().to_string(), "default");
        assert!(matches!(
            "101;0".parse::<ControlMessage>(),
            Err(TelemetryError::IntensityOutOfRange(101))
        ));
        assert!(matches!("lights".parse::<ControlMessage>(), Err(TelemetryError::InvalidControl(_))));
        assert!(matches!("-1;5".parse::<ControlMessage>(), Err(TelemetryError::InvalidControl(_))));
    }
}
