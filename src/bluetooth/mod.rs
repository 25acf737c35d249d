pub mod gatt;
pub mod scanner;
pub mod session;

use std::future::Future;
use std::sync::Arc;

use crate::error::MonitorError;
use crate::models::CommandKind;
use crate::shutdown::Shutdown;
use session::PeripheralSession;

pub use gatt::{GattActuator, GattSensor};
pub use scanner::open_adapter;
pub use session::{run_sensor_session, SessionState, SessionTiming};

/// Notification source of the sensor peripheral
pub trait SensorLink: Send + Sync {
    /// Discover, connect and subscribe, then hand every notification payload
    /// to `on_payload` until the link fails or shutdown is requested.
    ///
    /// Marks `session` Connected once subscribed. Returns `Ok(())` only on
    /// shutdown; discovery and I/O failures come back as errors so the caller
    /// can back off and retry. All peripheral resources are released before
    /// returning.
    fn listen<H>(
        &self,
        session: &PeripheralSession,
        on_payload: &H,
        shutdown: &mut Shutdown,
    ) -> impl Future<Output = Result<(), MonitorError>> + Send
    where
        H: Fn(&[u8]) + Send + Sync;
}

/// Command sink of the actuator peripheral
pub trait ActuatorLink: Send + Sync + 'static {
    /// One full connect, write, read-back and disconnect cycle.
    /// Returns the acknowledgement token if one could be read back.
    fn transmit(
        &self,
        kind: CommandKind,
    ) -> impl Future<Output = Result<Option<String>, MonitorError>> + Send;
}

impl<T: SensorLink> SensorLink for Arc<T> {
    fn listen<H>(
        &self,
        session: &PeripheralSession,
        on_payload: &H,
        shutdown: &mut Shutdown,
    ) -> impl Future<Output = Result<(), MonitorError>> + Send
    where
        H: Fn(&[u8]) + Send + Sync,
    {
        (**self).listen(session, on_payload, shutdown)
    }
}

impl<T: ActuatorLink> ActuatorLink for Arc<T> {
    fn transmit(
        &self,
        kind: CommandKind,
    ) -> impl Future<Output = Result<Option<String>, MonitorError>> + Send {
        (**self).transmit(kind)
    }
}
