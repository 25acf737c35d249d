/// Bluetooth Low Energy adapter setup and peripheral discovery by name
use bluer::{Adapter, AdapterEvent, Device};
use futures_util::{pin_mut, StreamExt};
use log::{debug, error, info, warn};
use tokio::time::{timeout, Duration};

use crate::error::MonitorError;

/// Open the default Bluetooth adapter and prepare it for LE discovery
///
/// # Returns
/// The powered adapter, or `ConnectionLost` if BlueZ is unavailable
pub async fn open_adapter() -> Result<Adapter, MonitorError> {
    // Initialize Bluetooth session
    let session = match bluer::Session::new().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create Bluetooth session: {}", e);
            return Err(e.into());
        }
    };

    // Get the default Bluetooth adapter
    let adapter = match session.default_adapter().await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Failed to get default Bluetooth adapter: {}", e);
            return Err(e.into());
        }
    };

    // Ensure Bluetooth adapter is powered on
    if let Err(e) = adapter.set_powered(true).await {
        error!("Failed to power on adapter: {}", e);
        return Err(e.into());
    }

    // Configure discovery filter for Low Energy devices only
    let filter = bluer::DiscoveryFilter {
        transport: bluer::DiscoveryTransport::Le,
        ..Default::default()
    };

    // Apply the discovery filter (warn if it fails, but continue)
    if let Err(e) = adapter.set_discovery_filter(filter).await {
        warn!("Failed to set discovery filter: {}", e);
    }

    info!("Using Bluetooth adapter {}", adapter.name());
    Ok(adapter)
}

/// Advertised name of a device, if BlueZ knows one
async fn advertised_name(device: &Device) -> Option<String> {
    match device.name().await {
        Ok(name) => name,
        Err(e) => {
            debug!("Failed to read name of {}: {}", device.address(), e);
            None
        }
    }
}

/// A cached device only counts when it has been heard recently (BlueZ
/// reports an RSSI); a paired device that is out of range has none.
fn is_live_match(advertised: Option<&str>, rssi: Option<i16>, name: &str) -> bool {
    advertised == Some(name) && rssi.is_some()
}

/// Find a peripheral whose name matches `name` exactly
///
/// Devices BlueZ already knows about are used only if currently in range;
/// otherwise discovery runs until a match shows up or `scan_timeout` elapses.
///
/// # Arguments
/// * `adapter` - Powered adapter from [`open_adapter`]
/// * `name` - Exact advertised device name
/// * `scan_timeout` - How long to scan before giving up
///
/// # Returns
/// The matching device, or `DiscoveryTimeout` when nothing matched in time
pub async fn find_device_by_name(
    adapter: &Adapter,
    name: &str,
    scan_timeout: Duration,
) -> Result<Device, MonitorError> {
    for addr in adapter.device_addresses().await? {
        let device = match adapter.device(addr) {
            Ok(device) => device,
            Err(_) => continue,
        };
        let advertised = advertised_name(&device).await;
        let rssi = device.rssi().await.unwrap_or(None);
        if is_live_match(advertised.as_deref(), rssi, name) {
            debug!("Found known device {} at {} in range", name, addr);
            return Ok(device);
        }
    }

    // Start device discovery; dropping the stream stops it
    let discovery = adapter.discover_devices().await?;
    let search = async {
        pin_mut!(discovery);
        while let Some(event) = discovery.next().await {
            if let AdapterEvent::DeviceAdded(addr) = event {
                let device = match adapter.device(addr) {
                    Ok(device) => device,
                    Err(_) => continue,
                };
                if advertised_name(&device).await.as_deref() == Some(name) {
                    debug!("Discovered {} at {}", name, addr);
                    return Some(device);
                }
            }
        }
        None
    };

    match timeout(scan_timeout, search).await {
        Ok(Some(device)) => Ok(device),
        Ok(None) | Err(_) => Err(MonitorError::DiscoveryTimeout {
            name: name.to_string(),
            timeout_secs: scan_timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_device_must_be_in_range() {
        assert!(is_live_match(Some("ESP32_SEN5x"), Some(-70), "ESP32_SEN5x"));
        // Paired but out of range
        assert!(!is_live_match(Some("ESP32_SEN5x"), None, "ESP32_SEN5x"));
        assert!(!is_live_match(Some("ESP32_SEN5"), Some(-70), "ESP32_SEN5x"));
        assert!(!is_live_match(None, Some(-40), "ESP32_SEN5x"));
    }
}
