/// Decoding of sensor notification payloads into readings
use serde::Deserialize;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::MonitorError;
use crate::models::Reading;
use crate::utils::{celsius_to_fahrenheit, round_to};

/// Display unit temperatures are converted to at decode time.
/// The sensor itself always reports Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    fn from_celsius(self, celsius: f32) -> f32 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius_to_fahrenheit(celsius),
        }
    }
}

impl FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(TemperatureUnit::Celsius),
            "f" | "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(format!("unknown temperature unit '{}'", other)),
        }
    }
}

/// Wire shape of one notification: a JSON object, extra keys ignored
#[derive(Debug, Deserialize)]
struct RawTelemetry {
    #[serde(rename = "T")]
    temperature: Option<f32>,
    #[serde(rename = "H")]
    humidity: Option<f32>,
    #[serde(rename = "P")]
    particulate: Option<f32>,
    #[serde(rename = "V")]
    voc: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    unit: TemperatureUnit,
}

impl TelemetryDecoder {
    pub fn new(unit: TemperatureUnit) -> Self {
        TelemetryDecoder { unit }
    }

    pub fn decode(&self, payload: &[u8], previous: Option<&Reading>) -> Result<Reading, MonitorError> {
        self.decode_at(payload, previous, OffsetDateTime::now_utc())
    }

    /// Decode a notification payload into a Reading stamped with `now`
    ///
    /// Fields missing from the payload keep the value of `previous` so that a
    /// partial payload never reads as zero humidity. Before any reading has
    /// been accepted, temperature and humidity are required while particulate
    /// and VOC default to zero; some sensor builds never report VOC.
    ///
    /// # Arguments
    /// * `payload` - Raw characteristic value, UTF-8 JSON such as `{"T":21.5,"H":40}`
    /// * `previous` - Last accepted reading, source of sticky values
    /// * `now` - Timestamp for the new reading
    ///
    /// # Returns
    /// The new Reading, or `DecodeError` if the payload is malformed
    pub fn decode_at(
        &self,
        payload: &[u8],
        previous: Option<&Reading>,
        now: OffsetDateTime,
    ) -> Result<Reading, MonitorError> {
        let raw: RawTelemetry = serde_json::from_slice(payload)
            .map_err(|e| MonitorError::DecodeError(e.to_string()))?;

        let temperature = match raw.temperature {
            Some(celsius) => round_to(self.unit.from_celsius(celsius), 2),
            None => sticky("T", previous.map(|p| p.temperature))?,
        };
        let humidity = match raw.humidity {
            // Capped like the sensor's own range
            Some(h) => round_to(h.clamp(0.0, 100.0), 2),
            None => sticky("H", previous.map(|p| p.humidity))?,
        };
        let particulate = match raw.particulate {
            Some(p) => round_to(p, 2),
            None => previous.map_or(0.0, |p| p.particulate),
        };
        let voc = match raw.voc {
            Some(v) => round_to(v, 2),
            None => previous.map_or(0.0, |p| p.voc),
        };

        Ok(Reading {
            temperature,
            humidity,
            particulate,
            voc,
            timestamp: now,
        })
    }
}

fn sticky(field: &str, previous: Option<f32>) -> Result<f32, MonitorError> {
    previous.ok_or_else(|| {
        MonitorError::DecodeError(format!(
            "field '{}' missing and no previous value to keep",
            field
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn celsius() -> TelemetryDecoder {
        TelemetryDecoder::new(TemperatureUnit::Celsius)
    }

    #[test]
    fn decodes_full_payload() {
        let now = datetime!(2024-06-01 12:00 UTC);
        let reading = celsius()
            .decode_at(br#"{"T":21.456,"H":40.5,"P":3.2,"V":101,"NOx":1}"#, None, now)
            .unwrap();

        assert_eq!(reading.temperature, 21.46);
        assert_eq!(reading.humidity, 40.5);
        assert_eq!(reading.particulate, 3.2);
        assert_eq!(reading.voc, 101.0);
        assert_eq!(reading.timestamp, now);
    }

    #[test]
    fn converts_to_fahrenheit() {
        let decoder = TelemetryDecoder::new(TemperatureUnit::Fahrenheit);
        let reading = decoder
            .decode(br#"{"T":25,"H":40,"P":1,"V":1}"#, None)
            .unwrap();
        assert_eq!(reading.temperature, 77.0);
    }

    #[test]
    fn missing_fields_keep_previous_values() {
        let decoder = celsius();
        let first = decoder
            .decode(br#"{"T":20,"H":55,"P":4,"V":90}"#, None)
            .unwrap();
        let second = decoder.decode(br#"{"T":21}"#, Some(&first)).unwrap();

        assert_eq!(second.temperature, 21.0);
        assert_eq!(second.humidity, 55.0);
        assert_eq!(second.particulate, 4.0);
        assert_eq!(second.voc, 90.0);
    }

    #[test]
    fn null_counts_as_missing() {
        let decoder = celsius();
        let first = decoder
            .decode(br#"{"T":20,"H":55,"P":4,"V":90}"#, None)
            .unwrap();
        let second = decoder
            .decode(br#"{"T":20,"H":null,"P":4,"V":90}"#, Some(&first))
            .unwrap();
        assert_eq!(second.humidity, 55.0);
    }

    #[test]
    fn missing_field_without_history_is_an_error() {
        let err = celsius().decode(br#"{"T":20,"P":4,"V":90}"#, None).unwrap_err();
        assert!(matches!(err, MonitorError::DecodeError(msg) if msg.contains("'H'")));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let decoder = celsius();
        for payload in [&b"not json"[..], b"{\"H\":\"wet\"}", b"42", b"\xff\xfe"] {
            assert!(matches!(
                decoder.decode(payload, None),
                Err(MonitorError::DecodeError(_))
            ));
        }
    }

    #[test]
    fn optional_fields_default_on_first_reading() {
        let decoder = celsius();
        let first = decoder.decode(br#"{"T":21.0,"H":40,"P":2.5}"#, None).unwrap();
        assert_eq!(first.humidity, 40.0);
        assert_eq!(first.particulate, 2.5);
        assert_eq!(first.voc, 0.0);

        let first = decoder.decode(br#"{"T":21.0,"H":40}"#, None).unwrap();
        assert_eq!(first.particulate, 0.0);

        // Once known, a value stays sticky
        let seen = decoder
            .decode(br#"{"T":21.0,"H":40,"P":2.5,"V":120}"#, None)
            .unwrap();
        let next = decoder
            .decode(br#"{"T":21.0,"H":41,"P":3}"#, Some(&seen))
            .unwrap();
        assert_eq!(next.voc, 120.0);
    }

    #[test]
    fn missing_temperature_without_history_is_an_error() {
        assert!(matches!(
            celsius().decode(br#"{"H":40,"P":1,"V":1}"#, None),
            Err(MonitorError::DecodeError(msg)) if msg.contains("'T'")
        ));
    }

    #[test]
    fn humidity_is_clamped() {
        let reading = celsius()
            .decode(br#"{"T":20,"H":104.2,"P":0,"V":0}"#, None)
            .unwrap();
        assert_eq!(reading.humidity, 100.0);
    }
}
