use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use crate::error::MonitorError;

/// One decoded telemetry sample. Never mutated after decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// In the configured display unit
    pub temperature: f32,
    pub humidity: f32,
    #[serde(rename = "pm_levels")]
    pub particulate: f32,
    #[serde(rename = "voc_levels")]
    pub voc: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Actuator command, written to the device as a short text token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    On,
    Off,
}

impl CommandKind {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            CommandKind::On
        } else {
            CommandKind::Off
        }
    }

    /// Actuator state this command produces
    pub fn enabled(self) -> bool {
        matches!(self, CommandKind::On)
    }

    pub fn as_token(self) -> &'static str {
        match self {
            CommandKind::On => "on",
            CommandKind::Off => "off",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for CommandKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.eq_ignore_ascii_case("on") {
            Ok(CommandKind::On)
        } else if token.eq_ignore_ascii_case("off") {
            Ok(CommandKind::Off)
        } else {
            Err(MonitorError::InvalidControlInput(format!(
                "unknown command token '{}'",
                token
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LastCommand {
    None,
    On,
    Off,
}

impl From<CommandKind> for LastCommand {
    fn from(kind: CommandKind) -> Self {
        match kind {
            CommandKind::On => LastCommand::On,
            CommandKind::Off => LastCommand::Off,
        }
    }
}

/// Control state shown on the dashboard
///
/// `target_humidity` and `hysteresis_band` are only changed through the
/// controller's validated setters, and `actuator_enabled` only after the
/// dispatcher confirmed a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    pub auto_mode: bool,
    #[serde(rename = "dehumidifier_enabled")]
    pub actuator_enabled: bool,
    pub target_humidity: f32,
    #[serde(rename = "hysteresis")]
    pub hysteresis_band: f32,
    pub last_command: LastCommand,
    pub last_command_succeeded: bool,
    pub sensor_connected: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub actuator_last_seen: Option<OffsetDateTime>,
}

impl ControlStatus {
    pub fn new(auto_mode: bool, target_humidity: f32, hysteresis_band: f32) -> Self {
        ControlStatus {
            auto_mode,
            actuator_enabled: false,
            target_humidity,
            hysteresis_band,
            last_command: LastCommand::None,
            last_command_succeeded: false,
            sensor_connected: false,
            actuator_last_seen: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeripheralRole {
    Sensor,
    Actuator,
}

impl fmt::Display for PeripheralRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeripheralRole::Sensor => f.write_str("sensor"),
            PeripheralRole::Actuator => f.write_str("actuator"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tokens_parse_case_insensitively() {
        assert_eq!("ON".parse::<CommandKind>().unwrap(), CommandKind::On);
        assert_eq!(" off\n".parse::<CommandKind>().unwrap(), CommandKind::Off);
        assert!("toggle".parse::<CommandKind>().is_err());
        assert_eq!(CommandKind::On.to_string(), "on");
    }

    #[test]
    fn control_status_uses_dashboard_field_names() {
        let status = ControlStatus::new(true, 45.0, 3.0);
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["dehumidifier_enabled"], false);
        assert_eq!(json["hysteresis"], 3.0);
        assert_eq!(json["last_command"], "NONE");
        assert!(json["actuator_last_seen"].is_null());
    }
}
