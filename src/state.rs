/// Process-wide live snapshot shared between the control loop and readers
///
/// A single RwLock covers the latest reading, the history window and the
/// control status, so a reader never sees a half-applied update. Guards are
/// never held across an await point.
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{ControlStatus, Reading};
use crate::telemetry::HistoryBuffer;

#[derive(Debug)]
struct Snapshot {
    latest: Option<Reading>,
    history: HistoryBuffer,
    control: ControlStatus,
}

#[derive(Debug)]
pub struct LiveState {
    inner: RwLock<Snapshot>,
}

impl LiveState {
    pub fn new(history_capacity: usize, control: ControlStatus) -> Self {
        LiveState {
            inner: RwLock::new(Snapshot {
                latest: None,
                history: HistoryBuffer::new(history_capacity),
                control,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest_reading(&self) -> Option<Reading> {
        self.read().latest
    }

    pub fn history(&self, limit: usize) -> Vec<Reading> {
        self.read().history.recent(limit)
    }

    pub fn history_len(&self) -> usize {
        self.read().history.len()
    }

    pub fn control_status(&self) -> ControlStatus {
        self.read().control.clone()
    }

    /// Latest reading and control status taken under one lock
    pub fn reading_and_status(&self) -> (Option<Reading>, ControlStatus) {
        let snapshot = self.read();
        (snapshot.latest, snapshot.control.clone())
    }

    /// Store a freshly decoded reading as current and append it to history
    pub(crate) fn record_reading(&self, reading: Reading) {
        let mut snapshot = self.write();
        snapshot.latest = Some(reading);
        snapshot.history.push(reading);
    }

    /// Apply a change to the control status and return the result
    pub(crate) fn update_control<F>(&self, apply: F) -> ControlStatus
    where
        F: FnOnce(&mut ControlStatus),
    {
        let mut snapshot = self.write();
        apply(&mut snapshot.control);
        snapshot.control.clone()
    }

    /// Returns true when the flag actually changed
    pub(crate) fn set_sensor_connected(&self, connected: bool) -> bool {
        let mut snapshot = self.write();
        let changed = snapshot.control.sensor_connected != connected;
        snapshot.control.sensor_connected = connected;
        changed
    }
}
