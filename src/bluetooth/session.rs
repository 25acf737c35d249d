/// Connection lifecycle of one wireless peripheral
///
/// `Disconnected -> Scanning -> Connected -> Disconnected -> Scanning ...`
/// Scanning may also fall straight back to Disconnected when discovery or
/// connect fails. The state is owned by whoever drives the peripheral; other
/// components only watch the connected projection.
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::bluetooth::{ActuatorLink, SensorLink};
use crate::error::MonitorError;
use crate::models::PeripheralRole;
use crate::monitor::Monitor;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Scanning,
    Connected,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }

    fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Scanning) | (Scanning, Connected) | (Scanning, Disconnected) | (Connected, Disconnected)
        )
    }
}

#[derive(Debug, Clone)]
pub struct PeripheralSession {
    role: PeripheralRole,
    state: Arc<watch::Sender<SessionState>>,
}

impl PeripheralSession {
    pub fn new(role: PeripheralRole) -> Self {
        let (tx, _rx) = watch::channel(SessionState::Disconnected);
        PeripheralSession {
            role,
            state: Arc::new(tx),
        }
    }

    pub fn role(&self) -> PeripheralRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver for connectivity tracking
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `next`, returning false for a no-op or an illegal transition
    pub fn transition(&self, next: SessionState) -> bool {
        let role = self.role;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_become(next) {
                warn!(
                    "Ignoring {} session transition {:?} -> {:?}",
                    role, current, next
                );
                return false;
            }
            debug!("{} session: {:?} -> {:?}", role, current, next);
            *current = next;
            true
        })
    }

    /// Return to Disconnected from wherever the session is
    pub fn reset(&self) {
        if self.state() != SessionState::Disconnected {
            self.transition(SessionState::Disconnected);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    /// Pause between a failure and the next scan
    pub reconnect_delay: Duration,
}

/// Keep the sensor connected for the life of the process
///
/// Each round scans, connects and streams notifications into
/// [`Monitor::handle_notification`]. Any failure drops the session, waits
/// `reconnect_delay` and starts over. Only `shutdown` ends the loop.
pub async fn run_sensor_session<S, L>(
    link: S,
    session: PeripheralSession,
    monitor: Arc<Monitor<L>>,
    timing: SessionTiming,
    mut shutdown: Shutdown,
) where
    S: SensorLink,
    L: ActuatorLink,
{
    info!("Starting {} session", session.role());
    let on_payload = |payload: &[u8]| {
        // Decode errors are logged by the monitor and the payload dropped
        let _ = monitor.handle_notification(payload);
    };

    loop {
        if shutdown.is_triggered() {
            break;
        }
        session.transition(SessionState::Scanning);

        let result = link.listen(&session, &on_payload, &mut shutdown).await;
        session.reset();

        match result {
            Ok(()) => break,
            Err(e @ MonitorError::DiscoveryTimeout { .. }) => {
                warn!("{} not found ({}): {}", session.role(), e.kind(), e)
            }
            Err(e) => warn!("{} session ended ({}): {}", session.role(), e.kind(), e),
        }

        debug!(
            "Reconnecting {} in {:?}",
            session.role(),
            timing.reconnect_delay
        );
        tokio::select! {
            _ = sleep(timing.reconnect_delay) => {}
            _ = shutdown.wait() => break,
        }
    }

    session.reset();
    info!("{} session stopped", session.role());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_reconnect_cycle() {
        let session = PeripheralSession::new(PeripheralRole::Sensor);
        let watcher = session.watch();
        assert_eq!(session.state(), SessionState::Disconnected);

        assert!(session.transition(SessionState::Scanning));
        assert!(session.transition(SessionState::Connected));
        assert!(session.is_connected());
        assert!(session.transition(SessionState::Disconnected));
        assert!(session.transition(SessionState::Scanning));
        assert!(session.transition(SessionState::Disconnected));

        assert_eq!(*watcher.borrow(), SessionState::Disconnected);
    }

    #[test]
    fn rejects_shortcuts() {
        let session = PeripheralSession::new(PeripheralRole::Actuator);
        assert!(!session.transition(SessionState::Connected));
        assert!(!session.transition(SessionState::Disconnected));

        session.transition(SessionState::Scanning);
        session.transition(SessionState::Connected);
        assert!(!session.transition(SessionState::Scanning));
        assert_eq!(session.state(), SessionState::Connected);

        session.reset();
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
