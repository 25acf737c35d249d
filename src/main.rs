use log::{error, info, warn};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};

use rust_airhub::bluetooth::session::PeripheralSession;
use rust_airhub::bluetooth::{open_adapter, run_sensor_session, GattActuator, GattSensor, SessionTiming};
use rust_airhub::{shutdown, Monitor, MonitorConfig, PeripheralRole};

/// How long tasks get to wind down after Ctrl+C
const SHUTDOWN_GRACE_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match MonitorConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Without a usable adapter the hub still serves state, sessions just idle
    let adapter = if config.ble_enabled {
        match open_adapter().await {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!("Bluetooth unavailable, running without peripherals: {}", e);
                None
            }
        }
    } else {
        info!("Bluetooth disabled by configuration");
        None
    };

    let sensor_session = PeripheralSession::new(PeripheralRole::Sensor);
    let actuator_session = PeripheralSession::new(PeripheralRole::Actuator);

    let actuator = GattActuator::new(
        adapter.clone(),
        config.actuator.clone(),
        config.scan_timeout,
        actuator_session.clone(),
    );
    let sensor = GattSensor::new(adapter, config.sensor.clone(), config.scan_timeout);

    let (monitor, broadcast_worker) = Monitor::new(&config, actuator);
    let monitor = Arc::new(monitor);
    let (trigger, shutdown) = shutdown::channel();

    let mut tasks = JoinSet::new();
    tasks.spawn(broadcast_worker.run(shutdown.clone()));
    {
        let monitor = Arc::clone(&monitor);
        let states = sensor_session.watch();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            monitor
                .track_connectivity(PeripheralRole::Sensor, states, shutdown)
                .await
        });
    }
    {
        let monitor = Arc::clone(&monitor);
        let states = actuator_session.watch();
        let shutdown = shutdown.clone();
        tasks.spawn(async move {
            monitor
                .track_connectivity(PeripheralRole::Actuator, states, shutdown)
                .await
        });
    }
    {
        let monitor = Arc::clone(&monitor);
        let shutdown = shutdown.clone();
        tasks.spawn(async move { monitor.run_control_loop(shutdown).await });
    }
    tasks.spawn(run_sensor_session(
        sensor,
        sensor_session,
        Arc::clone(&monitor),
        SessionTiming {
            reconnect_delay: config.reconnect_delay,
        },
        shutdown,
    ));

    info!(
        "Hub running: sensor '{}', actuator '{}', target {:.1}% ± {:.1}",
        config.sensor.name, config.actuator.name, config.target_humidity, config.hysteresis
    );

    // Run until Ctrl+C or until a task dies
    let mut failure = None;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Program terminated by user. Exiting gracefully."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        }
        Some(result) = tasks.join_next() => {
            match result {
                Ok(()) => warn!("A service task exited unexpectedly"),
                Err(e) => {
                    error!("Service task failed: {}", e);
                    failure = Some(e);
                }
            }
        }
    }

    trigger.fire();
    let drain = async { while tasks.join_next().await.is_some() {} };
    if timeout(Duration::from_secs(SHUTDOWN_GRACE_SECS), drain).await.is_err() {
        warn!("Tasks still running after {}s, aborting", SHUTDOWN_GRACE_SECS);
        tasks.abort_all();
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
