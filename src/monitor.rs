/// Composition of the control core and the API the web layer consumes
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

use crate::bluetooth::session::SessionState;
use crate::bluetooth::ActuatorLink;
use crate::broadcast::{BroadcastWorker, MonitorEvent, StateBroadcaster, SubscriberId, Subscription};
use crate::config::MonitorConfig;
use crate::control::{CommandDispatcher, HysteresisController};
use crate::error::MonitorError;
use crate::models::{CommandKind, ControlStatus, PeripheralRole, Reading};
use crate::shutdown::Shutdown;
use crate::state::LiveState;
use crate::telemetry::TelemetryDecoder;

pub struct Monitor<L> {
    decoder: TelemetryDecoder,
    live: Arc<LiveState>,
    broadcaster: StateBroadcaster,
    controller: HysteresisController<L>,
}

impl<L: ActuatorLink> Monitor<L> {
    /// Build the core around an actuator link
    ///
    /// The returned worker must be run (see [`BroadcastWorker::run`]) for
    /// subscribers to receive events.
    pub fn new(config: &MonitorConfig, actuator: L) -> (Self, BroadcastWorker) {
        let live = Arc::new(LiveState::new(
            config.history_capacity,
            ControlStatus::new(config.auto_mode, config.target_humidity, config.hysteresis),
        ));
        let (broadcaster, worker) = StateBroadcaster::new(
            config.event_queue_capacity,
            config.subscriber_buffer,
            config.keepalive_interval,
        );
        let controller = HysteresisController::new(
            Arc::clone(&live),
            CommandDispatcher::new(actuator, config.retry.clone()),
            broadcaster.clone(),
        );

        let monitor = Monitor {
            decoder: TelemetryDecoder::new(config.temperature_unit),
            live,
            broadcaster,
            controller,
        };
        (monitor, worker)
    }

    pub fn controller(&self) -> &HysteresisController<L> {
        &self.controller
    }

    /// Decode one sensor notification and feed it through the control loop
    ///
    /// A malformed payload is logged and dropped without touching any state.
    pub fn handle_notification(&self, payload: &[u8]) -> Result<Reading, MonitorError> {
        let previous = self.live.latest_reading();
        let reading = match self.decoder.decode(payload, previous.as_ref()) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    "Dropping sensor payload ({}): {} [{}]",
                    e.kind(),
                    e,
                    String::from_utf8_lossy(payload)
                );
                return Err(e);
            }
        };

        debug!(
            "Reading: temp={:.2}, humidity={:.2}%, pm={:.2}, voc={:.2}",
            reading.temperature, reading.humidity, reading.particulate, reading.voc
        );
        self.live.record_reading(reading);
        self.broadcaster
            .publish(MonitorEvent::SensorData { data: reading });
        self.controller.request_evaluation();
        Ok(reading)
    }

    pub fn get_current_reading(&self) -> Option<Reading> {
        self.live.latest_reading()
    }

    /// Up to `limit` most recent readings, oldest first
    pub fn get_history(&self, limit: usize) -> Vec<Reading> {
        self.live.history(limit)
    }

    pub fn get_control_status(&self) -> ControlStatus {
        self.live.control_status()
    }

    pub fn set_target(&self, target: f32, hysteresis: Option<f32>) -> Result<ControlStatus, MonitorError> {
        self.controller.set_target(target, hysteresis)
    }

    pub fn set_auto_mode(&self, enabled: bool) -> ControlStatus {
        self.controller.set_auto_mode(enabled)
    }

    pub async fn manual_toggle(&self) -> Result<ControlStatus, MonitorError> {
        self.controller.manual_toggle().await
    }

    pub async fn manual_command(&self, kind: CommandKind) -> Result<ControlStatus, MonitorError> {
        self.controller.manual_command(kind).await
    }

    /// Subscribe to live events; the first event is the current snapshot
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe_with(|| {
            let (sensor_data, control_status) = self.live.reading_and_status();
            MonitorEvent::InitialData {
                sensor_data,
                control_status,
            }
        })
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub fn publish(&self, event: MonitorEvent) -> bool {
        self.broadcaster.publish(event)
    }

    /// Evaluate the controller whenever a reading or setting change asks for it
    pub async fn run_control_loop(&self, mut shutdown: Shutdown) {
        info!("Control loop started");
        loop {
            tokio::select! {
                _ = self.controller.evaluation_requested() => {}
                _ = shutdown.wait() => break,
            }
            tokio::select! {
                outcome = self.controller.evaluate() => debug!("Evaluation: {:?}", outcome),
                _ = shutdown.wait() => break,
            }
        }
        info!("Control loop stopped");
    }

    /// Mirror a peripheral's connected projection into state and events
    pub async fn track_connectivity(
        &self,
        role: PeripheralRole,
        mut states: watch::Receiver<SessionState>,
        mut shutdown: Shutdown,
    ) {
        // Starts from the initial ControlStatus value
        let mut connected = false;
        loop {
            let now = states.borrow_and_update().is_connected();
            if now != connected {
                connected = now;
                self.record_connectivity(role, now);
            }
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.wait() => break,
            }
        }
    }

    fn record_connectivity(&self, role: PeripheralRole, connected: bool) {
        if role == PeripheralRole::Sensor {
            self.live.set_sensor_connected(connected);
        }
        info!(
            "{} {}",
            role,
            if connected { "connected" } else { "disconnected" }
        );
        self.broadcaster.publish(MonitorEvent::ConnectionStatus {
            peripheral: role,
            connected,
        });
    }
}
