/// Error taxonomy for the sensor-actuator control loop
///
/// Every failure in the core maps to exactly one of these kinds. None of them
/// is fatal to the process: each has a defined recovery action (retry, drop the
/// reading, or reject the caller's input) documented on the variant.
use thiserror::Error;

use crate::models::CommandKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    /// Peripheral not seen within the scan window. Retried after backoff.
    #[error("peripheral '{name}' not found within {timeout_secs}s scan window")]
    DiscoveryTimeout { name: String, timeout_secs: u64 },

    /// I/O failure mid-session. The session drops its resources and reconnects.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Malformed telemetry. The reading is dropped and previous values are kept.
    #[error("telemetry decode failed: {0}")]
    DecodeError(String),

    /// All dispatcher attempts exhausted. The next evaluation retries.
    #[error("command '{kind}' failed after {attempts} attempts")]
    CommandFailed { kind: CommandKind, attempts: u32 },

    /// Another command holds the dispatcher lock.
    #[error("actuator busy: another command is in flight")]
    ActuatorBusy,

    /// Out-of-range or disallowed control request. Rejected without state change.
    #[error("invalid control input: {0}")]
    InvalidControlInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<bluer::Error> for MonitorError {
    fn from(e: bluer::Error) -> Self {
        MonitorError::ConnectionLost(e.to_string())
    }
}

impl MonitorError {
    /// Short stable name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::DiscoveryTimeout { .. } => "DiscoveryTimeout",
            MonitorError::ConnectionLost(_) => "ConnectionLost",
            MonitorError::DecodeError(_) => "DecodeError",
            MonitorError::CommandFailed { .. } => "CommandFailed",
            MonitorError::ActuatorBusy => "ActuatorBusy",
            MonitorError::InvalidControlInput(_) => "InvalidControlInput",
            MonitorError::Config(_) => "Config",
        }
    }
}
