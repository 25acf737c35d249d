/// Hysteresis control of the dehumidifier
///
/// The decision rule is a symmetric dead band around the target:
/// switch on above `target + band`, off at or below `target - band`, and hold
/// the current state in between.
use log::{debug, info, warn};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::Notify;

use crate::bluetooth::ActuatorLink;
use crate::broadcast::{MonitorEvent, StateBroadcaster};
use crate::control::dispatcher::{CommandDispatcher, CommandReceipt};
use crate::error::MonitorError;
use crate::models::{CommandKind, ControlStatus};
use crate::state::LiveState;

pub const TARGET_RANGE: RangeInclusive<f32> = 20.0..=80.0;
pub const BAND_RANGE: RangeInclusive<f32> = 1.0..=10.0;

/// Desired actuator state for the given humidity
pub fn desired_state(humidity: f32, target: f32, band: f32, current_enabled: bool) -> bool {
    if humidity > target + band {
        true
    } else if humidity <= target - band {
        false
    } else {
        current_enabled
    }
}

pub fn validate_target(target: f32) -> Result<f32, MonitorError> {
    if target.is_finite() && TARGET_RANGE.contains(&target) {
        Ok(target)
    } else {
        Err(MonitorError::InvalidControlInput(format!(
            "target humidity {} outside {}..={}",
            target,
            TARGET_RANGE.start(),
            TARGET_RANGE.end()
        )))
    }
}

pub fn validate_band(band: f32) -> Result<f32, MonitorError> {
    if band.is_finite() && BAND_RANGE.contains(&band) {
        Ok(band)
    } else {
        Err(MonitorError::InvalidControlInput(format!(
            "hysteresis {} outside {}..={}",
            band,
            BAND_RANGE.start(),
            BAND_RANGE.end()
        )))
    }
}

/// What one evaluation did
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// No reading received yet
    NoReading,
    /// Desired state equals current state
    Hold { enabled: bool },
    /// A transition is due but auto mode is off
    Manual { desired: bool },
    /// The actuator confirmed the transition
    Switched(CommandKind),
    /// Every attempt failed; retried on the next evaluation
    Failed(CommandKind),
    /// Another command was in flight
    Busy,
}

pub struct HysteresisController<L> {
    live: Arc<LiveState>,
    dispatcher: CommandDispatcher<L>,
    broadcaster: StateBroadcaster,
    trigger: Notify,
}

impl<L: ActuatorLink> HysteresisController<L> {
    pub fn new(
        live: Arc<LiveState>,
        dispatcher: CommandDispatcher<L>,
        broadcaster: StateBroadcaster,
    ) -> Self {
        HysteresisController {
            live,
            dispatcher,
            broadcaster,
            trigger: Notify::new(),
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<L> {
        &self.dispatcher
    }

    /// Ask the control loop to evaluate soon. Requests made while an
    /// evaluation is pending collapse into one.
    pub fn request_evaluation(&self) {
        self.trigger.notify_one();
    }

    /// Wait for the next [`request_evaluation`](Self::request_evaluation)
    pub async fn evaluation_requested(&self) {
        self.trigger.notified().await;
    }

    /// Compare the latest humidity with the band and switch the actuator if needed
    pub async fn evaluate(&self) -> Evaluation {
        let (reading, status) = self.live.reading_and_status();
        let Some(reading) = reading else {
            return Evaluation::NoReading;
        };

        let current = status.actuator_enabled;
        let desired = desired_state(
            reading.humidity,
            status.target_humidity,
            status.hysteresis_band,
            current,
        );
        if desired == current {
            return Evaluation::Hold { enabled: current };
        }
        if !status.auto_mode {
            debug!(
                "Humidity {:.1}% calls for {} but auto mode is off",
                reading.humidity,
                CommandKind::from_enabled(desired)
            );
            return Evaluation::Manual { desired };
        }

        let kind = CommandKind::from_enabled(desired);
        info!(
            "Humidity {:.1}% vs target {:.1}% ± {:.1}: switching dehumidifier {}",
            reading.humidity, status.target_humidity, status.hysteresis_band, kind
        );
        match self.apply(kind, "auto_control").await {
            Ok(_) => Evaluation::Switched(kind),
            Err(MonitorError::ActuatorBusy) => Evaluation::Busy,
            Err(_) => Evaluation::Failed(kind),
        }
    }

    /// Send `kind` and record the outcome in the control status
    async fn apply(&self, kind: CommandKind, reason: &str) -> Result<CommandReceipt, MonitorError> {
        match self.dispatcher.dispatch(kind).await {
            Ok(receipt) => {
                let status = self.live.update_control(|s| {
                    s.actuator_enabled = kind.enabled();
                    s.last_command = kind.into();
                    s.last_command_succeeded = true;
                    s.actuator_last_seen = Some(receipt.confirmed_at);
                });
                self.publish(status, reason);
                Ok(receipt)
            }
            // Nothing reached the actuator; the next evaluation decides again
            Err(MonitorError::ActuatorBusy) => Err(MonitorError::ActuatorBusy),
            Err(e) => {
                warn!("Dehumidifier did not switch {} ({}): {}", kind, e.kind(), e);
                let status = self.live.update_control(|s| {
                    s.last_command = kind.into();
                    s.last_command_succeeded = false;
                });
                self.publish(status, "command_failed");
                Err(e)
            }
        }
    }

    fn publish(&self, status: ControlStatus, reason: &str) {
        self.broadcaster.publish(MonitorEvent::ControlUpdate {
            data: status,
            reason: reason.to_string(),
        });
    }

    /// Change the target and optionally the band
    ///
    /// Both values are validated before anything changes; an out-of-range
    /// value rejects the whole call.
    pub fn set_target(&self, target: f32, hysteresis: Option<f32>) -> Result<ControlStatus, MonitorError> {
        let target = validate_target(target)?;
        let band = hysteresis.map(validate_band).transpose()?;

        let status = self.live.update_control(|s| {
            s.target_humidity = target;
            if let Some(band) = band {
                s.hysteresis_band = band;
            }
        });
        info!(
            "Target set to {:.1}% ± {:.1}",
            status.target_humidity, status.hysteresis_band
        );
        self.publish(status.clone(), "settings");
        self.request_evaluation();
        Ok(status)
    }

    pub fn set_auto_mode(&self, enabled: bool) -> ControlStatus {
        let mut changed = false;
        let status = self.live.update_control(|s| {
            changed = s.auto_mode != enabled;
            s.auto_mode = enabled;
        });
        if changed {
            info!("Auto mode {}", if enabled { "enabled" } else { "disabled" });
            self.publish(status.clone(), "auto_mode");
            self.request_evaluation();
        }
        status
    }

    /// Explicit on/off from the operator, only allowed in manual mode
    pub async fn manual_command(&self, kind: CommandKind) -> Result<ControlStatus, MonitorError> {
        if self.live.control_status().auto_mode {
            return Err(MonitorError::InvalidControlInput(
                "manual control is disabled while auto mode is on".into(),
            ));
        }
        self.apply(kind, "manual_control").await?;
        Ok(self.live.control_status())
    }

    /// Flip the actuator, only allowed in manual mode
    pub async fn manual_toggle(&self) -> Result<ControlStatus, MonitorError> {
        let status = self.live.control_status();
        if status.auto_mode {
            return Err(MonitorError::InvalidControlInput(
                "manual toggle is disabled while auto mode is on".into(),
            ));
        }
        self.manual_command(CommandKind::from_enabled(!status.actuator_enabled))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::dispatcher::RetryPolicy;
    use crate::models::{LastCommand, Reading};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use time::OffsetDateTime;
    use tokio::time::Duration;

    #[derive(Default)]
    struct SwitchLink {
        fail: AtomicBool,
        calls: AtomicU32,
    }

    impl ActuatorLink for SwitchLink {
        async fn transmit(&self, kind: CommandKind) -> Result<Option<String>, MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(MonitorError::ConnectionLost("out of range".into()))
            } else {
                Ok(Some(kind.as_token().to_string()))
            }
        }
    }

    fn controller(auto_mode: bool) -> HysteresisController<SwitchLink> {
        let live = Arc::new(LiveState::new(10, ControlStatus::new(auto_mode, 30.0, 3.0)));
        let (broadcaster, _worker) = StateBroadcaster::new(64, 16, Duration::from_secs(30));
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        HysteresisController::new(
            live,
            CommandDispatcher::new(SwitchLink::default(), policy),
            broadcaster,
        )
    }

    fn feed(controller: &HysteresisController<SwitchLink>, humidity: f32) {
        controller.live.record_reading(Reading {
            temperature: 70.0,
            humidity,
            particulate: 0.0,
            voc: 0.0,
            timestamp: OffsetDateTime::now_utc(),
        });
    }

    #[test]
    fn above_band_is_always_on() {
        for humidity in [33.1, 40.0, 99.0] {
            assert!(desired_state(humidity, 30.0, 3.0, false));
            assert!(desired_state(humidity, 30.0, 3.0, true));
        }
    }

    #[test]
    fn at_or_below_lower_edge_is_always_off() {
        for humidity in [27.0, 20.0, 0.0] {
            assert!(!desired_state(humidity, 30.0, 3.0, false));
            assert!(!desired_state(humidity, 30.0, 3.0, true));
        }
    }

    #[test]
    fn inside_band_holds() {
        for humidity in [27.1, 30.0, 33.0] {
            assert!(desired_state(humidity, 30.0, 3.0, true));
            assert!(!desired_state(humidity, 30.0, 3.0, false));
        }
    }

    #[test]
    fn validates_ranges() {
        assert!(validate_target(20.0).is_ok());
        assert!(validate_target(80.0).is_ok());
        assert!(validate_target(19.9).is_err());
        assert!(validate_target(f32::NAN).is_err());
        assert!(validate_band(1.0).is_ok());
        assert!(validate_band(10.5).is_err());
    }

    #[tokio::test]
    async fn no_reading_means_no_decision() {
        let controller = controller(true);
        assert_eq!(controller.evaluate().await, Evaluation::NoReading);
    }

    #[tokio::test]
    async fn switches_and_records_success() {
        let controller = controller(true);
        feed(&controller, 38.0);

        assert_eq!(controller.evaluate().await, Evaluation::Switched(CommandKind::On));
        let status = controller.live.control_status();
        assert!(status.actuator_enabled);
        assert_eq!(status.last_command, LastCommand::On);
        assert!(status.last_command_succeeded);
        assert!(status.actuator_last_seen.is_some());

        // Already on: nothing more to send
        assert_eq!(controller.evaluate().await, Evaluation::Hold { enabled: true });
        assert_eq!(controller.dispatcher().link().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_command_keeps_state_and_flags_failure() {
        let controller = controller(true);
        controller.dispatcher().link().fail.store(true, Ordering::SeqCst);
        feed(&controller, 38.0);

        assert_eq!(controller.evaluate().await, Evaluation::Failed(CommandKind::On));
        let status = controller.live.control_status();
        assert!(!status.actuator_enabled);
        assert!(!status.last_command_succeeded);
        assert_eq!(status.last_command, LastCommand::On);

        // Recovers on the next evaluation
        controller.dispatcher().link().fail.store(false, Ordering::SeqCst);
        assert_eq!(controller.evaluate().await, Evaluation::Switched(CommandKind::On));
        assert!(controller.live.control_status().last_command_succeeded);
    }

    #[tokio::test]
    async fn manual_mode_never_commands_on_its_own() {
        let controller = controller(false);
        feed(&controller, 50.0);
        assert_eq!(controller.evaluate().await, Evaluation::Manual { desired: true });
        assert_eq!(controller.dispatcher().link().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn manual_toggle_only_in_manual_mode() {
        let controller = controller(true);
        assert!(matches!(
            controller.manual_toggle().await,
            Err(MonitorError::InvalidControlInput(_))
        ));
        assert!(matches!(
            controller.manual_command(CommandKind::On).await,
            Err(MonitorError::InvalidControlInput(_))
        ));
        assert_eq!(controller.dispatcher().link().calls.load(Ordering::SeqCst), 0);

        controller.set_auto_mode(false);
        let status = controller.manual_toggle().await.unwrap();
        assert!(status.actuator_enabled);
        let status = controller.manual_toggle().await.unwrap();
        assert!(!status.actuator_enabled);
        assert_eq!(status.last_command, LastCommand::Off);
    }

    #[test]
    fn rejected_settings_leave_status_untouched() {
        let controller = controller(true);
        let before = controller.live.control_status();

        assert!(controller.set_target(15.0, Some(5.0)).is_err());
        assert!(controller.set_target(50.0, Some(0.5)).is_err());
        assert_eq!(controller.live.control_status(), before);

        let status = controller.set_target(50.0, None).unwrap();
        assert_eq!(status.target_humidity, 50.0);
        assert_eq!(status.hysteresis_band, 3.0);

        let status = controller.set_target(55.0, Some(4.0)).unwrap();
        assert_eq!(status.hysteresis_band, 4.0);
    }
}
