//! Control core of the home air monitor hub.
//!
//! A BLE sensor streams temperature, humidity, particulate and VOC readings;
//! the hub keeps a bounded history, decides with a hysteresis band when the
//! BLE dehumidifier should run, delivers commands with retries, and pushes
//! every state change to live observers.

pub mod bluetooth;
pub mod broadcast;
pub mod config;
pub mod control;
pub mod error;
pub mod models;
pub mod monitor;
pub mod shutdown;
pub mod state;
pub mod telemetry;
pub mod utils;

pub use broadcast::{MonitorEvent, StateBroadcaster, Subscription};
pub use config::MonitorConfig;
pub use error::MonitorError;
pub use models::{CommandKind, ControlStatus, LastCommand, PeripheralRole, Reading};
pub use monitor::Monitor;
