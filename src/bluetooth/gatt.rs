/// GATT implementations of the sensor and actuator links on top of BlueZ
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Device, Uuid};
use futures_util::{pin_mut, StreamExt};
use log::{debug, info, warn};
use tokio::time::Duration;

use crate::bluetooth::scanner::find_device_by_name;
use crate::bluetooth::session::{PeripheralSession, SessionState};
use crate::bluetooth::{ActuatorLink, SensorLink};
use crate::config::PeripheralConfig;
use crate::error::MonitorError;
use crate::models::CommandKind;
use crate::shutdown::Shutdown;

fn adapter_or_offline(adapter: &Option<Adapter>) -> Result<&Adapter, MonitorError> {
    adapter
        .as_ref()
        .ok_or_else(|| MonitorError::ConnectionLost("bluetooth adapter unavailable".into()))
}

async fn connect(device: &Device) -> Result<(), MonitorError> {
    if !device.is_connected().await? {
        device.connect().await?;
    }
    Ok(())
}

async fn disconnect(device: &Device) {
    if let Err(e) = device.disconnect().await {
        debug!("Disconnect from {} failed: {}", device.address(), e);
    }
}

/// Locate a characteristic by UUID across all services of a connected device
async fn find_characteristic(device: &Device, uuid: Uuid) -> Result<Characteristic, MonitorError> {
    for service in device.services().await? {
        for characteristic in service.characteristics().await? {
            if characteristic.uuid().await? == uuid {
                return Ok(characteristic);
            }
        }
    }
    Err(MonitorError::ConnectionLost(format!(
        "characteristic {} not found on {}",
        uuid,
        device.address()
    )))
}

/// Sensor peripheral streaming JSON telemetry through notifications
pub struct GattSensor {
    adapter: Option<Adapter>,
    target: PeripheralConfig,
    scan_timeout: Duration,
}

impl GattSensor {
    /// `adapter` is None when Bluetooth is disabled or missing
    pub fn new(adapter: Option<Adapter>, target: PeripheralConfig, scan_timeout: Duration) -> Self {
        GattSensor {
            adapter,
            target,
            scan_timeout,
        }
    }

    async fn stream_notifications<H>(
        &self,
        device: &Device,
        session: &PeripheralSession,
        on_payload: &H,
        shutdown: &mut Shutdown,
    ) -> Result<(), MonitorError>
    where
        H: Fn(&[u8]) + Send + Sync,
    {
        let setup = async {
            connect(device).await?;
            find_characteristic(device, self.target.characteristic).await
        };
        let Some(characteristic) = shutdown.run_until(setup).await.transpose()? else {
            return Ok(());
        };
        let subscribe = characteristic.notify();
        let Some(notifications) = shutdown.run_until(subscribe).await.transpose()? else {
            return Ok(());
        };
        pin_mut!(notifications);

        session.transition(SessionState::Connected);
        info!(
            "Connected to {} ({}), receiving notifications",
            self.target.name,
            device.address()
        );

        loop {
            tokio::select! {
                payload = notifications.next() => match payload {
                    Some(payload) => on_payload(payload.as_slice()),
                    None => {
                        return Err(MonitorError::ConnectionLost(format!(
                            "notification stream from {} ended",
                            self.target.name
                        )))
                    }
                },
                _ = shutdown.wait() => return Ok(()),
            }
        }
    }
}

impl SensorLink for GattSensor {
    async fn listen<H>(
        &self,
        session: &PeripheralSession,
        on_payload: &H,
        shutdown: &mut Shutdown,
    ) -> Result<(), MonitorError>
    where
        H: Fn(&[u8]) + Send + Sync,
    {
        let Some(adapter) = self.adapter.as_ref() else {
            // No radio: stay idle until shutdown
            debug!("Bluetooth disabled, {} session idle", self.target.name);
            shutdown.wait().await;
            return Ok(());
        };

        let search = find_device_by_name(adapter, &self.target.name, self.scan_timeout);
        let Some(device) = shutdown.run_until(search).await.transpose()? else {
            return Ok(());
        };

        let result = self
            .stream_notifications(&device, session, on_payload, shutdown)
            .await;
        // Unsubscribes by dropping the stream above, then release the link
        disconnect(&device).await;
        result
    }
}

/// Actuator peripheral, connected on demand for each command
pub struct GattActuator {
    adapter: Option<Adapter>,
    target: PeripheralConfig,
    scan_timeout: Duration,
    session: PeripheralSession,
}

impl GattActuator {
    pub fn new(
        adapter: Option<Adapter>,
        target: PeripheralConfig,
        scan_timeout: Duration,
        session: PeripheralSession,
    ) -> Self {
        GattActuator {
            adapter,
            target,
            scan_timeout,
            session,
        }
    }

    async fn exchange(&self, device: &Device, kind: CommandKind) -> Result<Option<String>, MonitorError> {
        connect(device).await?;
        self.session.transition(SessionState::Connected);

        let characteristic = find_characteristic(device, self.target.characteristic).await?;
        characteristic.write(kind.as_token().as_bytes()).await?;
        debug!("Wrote '{}' to {}", kind, self.target.name);

        // Read-back is best effort: the write above is authoritative
        match characteristic.read().await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).trim().to_string())),
            Err(e) => {
                debug!("No acknowledgement from {}: {}", self.target.name, e);
                Ok(None)
            }
        }
    }
}

impl ActuatorLink for GattActuator {
    async fn transmit(&self, kind: CommandKind) -> Result<Option<String>, MonitorError> {
        let adapter = adapter_or_offline(&self.adapter)?;

        let _reset = SessionReset(&self.session);
        self.session.transition(SessionState::Scanning);
        let device = find_device_by_name(adapter, &self.target.name, self.scan_timeout).await?;

        let result = self.exchange(&device, kind).await;
        if let Err(e) = &result {
            warn!("Exchange with {} failed: {}", self.target.name, e);
        }
        disconnect(&device).await;
        result
    }
}

/// Puts the session back to Disconnected however the exchange ends,
/// including when the dispatcher's deadline cancels it
struct SessionReset<'a>(&'a PeripheralSession);

impl Drop for SessionReset<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}
