use bluer::Uuid;
use log::debug;
use std::env;
use std::str::FromStr;
use tokio::time::Duration;

use crate::control::dispatcher::RetryPolicy;
use crate::control::hysteresis::{validate_band, validate_target};
use crate::error::MonitorError;
use crate::telemetry::decoder::TemperatureUnit;

const DEFAULT_SENSOR_NAME: &str = "ESP32_SEN5x";
const DEFAULT_SENSOR_CHAR_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";
const DEFAULT_ACTUATOR_NAME: &str = "ESP32_Dehumidifier";
const DEFAULT_ACTUATOR_CHAR_UUID: &str = "a16beeb4-bf06-4c17-9cec-fbc82db1a016";

/// Name and characteristic of one wireless peripheral
#[derive(Debug, Clone)]
pub struct PeripheralConfig {
    pub name: String,
    pub characteristic: Uuid,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub sensor: PeripheralConfig,
    pub actuator: PeripheralConfig,
    pub target_humidity: f32,
    pub hysteresis: f32,
    pub auto_mode: bool,
    pub temperature_unit: TemperatureUnit,
    pub history_capacity: usize,
    /// When false no Bluetooth I/O is attempted and both sessions stay idle
    pub ble_enabled: bool,
    pub scan_timeout: Duration,
    pub reconnect_delay: Duration,
    pub retry: RetryPolicy,
    pub keepalive_interval: Duration,
    pub event_queue_capacity: usize,
    pub subscriber_buffer: usize,
}

impl MonitorConfig {
    pub fn new() -> Result<Self, MonitorError> {
        // Load environment variables
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sensor = PeripheralConfig {
            name: lookup("SENSOR_NAME").unwrap_or_else(|| DEFAULT_SENSOR_NAME.to_string()),
            characteristic: parse_uuid(&lookup, "SENSOR_CHAR_UUID", DEFAULT_SENSOR_CHAR_UUID)?,
        };
        let actuator = PeripheralConfig {
            name: lookup("ACTUATOR_NAME").unwrap_or_else(|| DEFAULT_ACTUATOR_NAME.to_string()),
            characteristic: parse_uuid(
                &lookup,
                "ACTUATOR_CHAR_UUID",
                DEFAULT_ACTUATOR_CHAR_UUID,
            )?,
        };

        if sensor.name.trim().is_empty() || actuator.name.trim().is_empty() {
            return Err(MonitorError::Config(
                "SENSOR_NAME and ACTUATOR_NAME must not be empty".into(),
            ));
        }

        let target_humidity = validate_target(parse_var(&lookup, "TARGET_HUMIDITY", 45.0)?)
            .map_err(|e| MonitorError::Config(e.to_string()))?;
        let hysteresis = validate_band(parse_var(&lookup, "HYSTERESIS", 3.0)?)
            .map_err(|e| MonitorError::Config(e.to_string()))?;

        let retry = RetryPolicy {
            max_attempts: parse_var(&lookup, "COMMAND_MAX_ATTEMPTS", 3u32)?.max(1),
            base_delay: Duration::from_millis(parse_var(&lookup, "COMMAND_BACKOFF_MS", 2000u64)?),
            multiplier: parse_var(&lookup, "COMMAND_BACKOFF_MULTIPLIER", 1.5f64)?,
            attempt_timeout: Duration::from_secs(parse_var(
                &lookup,
                "COMMAND_ATTEMPT_TIMEOUT_SECS",
                20u64,
            )?),
        };
        if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
            return Err(MonitorError::Config(
                "COMMAND_BACKOFF_MULTIPLIER must be at least 1.0".into(),
            ));
        }

        let config = MonitorConfig {
            sensor,
            actuator,
            target_humidity,
            hysteresis,
            auto_mode: parse_bool(&lookup, "AUTO_MODE", true)?,
            temperature_unit: parse_var(&lookup, "TEMPERATURE_UNIT", TemperatureUnit::Fahrenheit)?,
            history_capacity: parse_var(&lookup, "HISTORY_CAPACITY", 300usize)?.max(1),
            ble_enabled: parse_bool(&lookup, "BLE_ENABLED", true)?,
            scan_timeout: Duration::from_secs(parse_var(&lookup, "SCAN_TIMEOUT_SECS", 10u64)?),
            reconnect_delay: Duration::from_secs(parse_var(
                &lookup,
                "RECONNECT_DELAY_SECS",
                5u64,
            )?),
            retry,
            keepalive_interval: Duration::from_secs(
                parse_var(&lookup, "KEEPALIVE_SECS", 30u64)?.max(1),
            ),
            event_queue_capacity: parse_var(&lookup, "EVENT_QUEUE_CAPACITY", 64usize)?.max(1),
            subscriber_buffer: parse_var(&lookup, "SUBSCRIBER_BUFFER", 32usize)?.max(1),
        };

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, MonitorError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| MonitorError::Config(format!("{}='{}': {}", key, raw, e))),
        _ => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool, MonitorError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(default),
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(MonitorError::Config(format!(
            "{}='{}' is not a boolean",
            key, other
        ))),
    }
}

fn parse_uuid<F>(lookup: &F, key: &str, default: &str) -> Result<Uuid, MonitorError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    Uuid::parse_str(raw.trim())
        .map_err(|e| MonitorError::Config(format!("{}='{}': {}", key, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<MonitorConfig, MonitorError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_the_deployed_devices() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.sensor.name, "ESP32_SEN5x");
        assert_eq!(config.actuator.name, "ESP32_Dehumidifier");
        assert_eq!(
            config.sensor.characteristic.to_string(),
            DEFAULT_SENSOR_CHAR_UUID
        );
        assert_eq!(config.target_humidity, 45.0);
        assert_eq!(config.hysteresis, 3.0);
        assert!(config.auto_mode);
        assert_eq!(config.history_capacity, 300);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("SENSOR_NAME", "Kitchen"),
            ("TARGET_HUMIDITY", "50"),
            ("HYSTERESIS", "2.5"),
            ("AUTO_MODE", "off"),
            ("TEMPERATURE_UNIT", "C"),
            ("HISTORY_CAPACITY", "600"),
        ])
        .unwrap();
        assert_eq!(config.sensor.name, "Kitchen");
        assert_eq!(config.target_humidity, 50.0);
        assert_eq!(config.hysteresis, 2.5);
        assert!(!config.auto_mode);
        assert_eq!(config.temperature_unit, TemperatureUnit::Celsius);
        assert_eq!(config.history_capacity, 600);
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        assert!(matches!(
            config_from(&[("TARGET_HUMIDITY", "95")]),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("HYSTERESIS", "0.5")]),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(config_from(&[("SENSOR_CHAR_UUID", "not-a-uuid")]).is_err());
        assert!(config_from(&[("AUTO_MODE", "maybe")]).is_err());
        assert!(config_from(&[("SCAN_TIMEOUT_SECS", "ten")]).is_err());
        assert!(config_from(&[("COMMAND_BACKOFF_MULTIPLIER", "0.5")]).is_err());
    }
}
