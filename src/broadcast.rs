/// Fan-out of state changes to live observers (dashboard sockets)
///
/// Publishers push into one bounded queue. A single worker drains it and
/// delivers each event to every subscriber in order, so events reach a given
/// subscriber in the order they were published. A subscriber whose buffer is
/// closed or full is dropped without affecting the others.
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::models::{ControlStatus, PeripheralRole, Reading};
use crate::shutdown::Shutdown;

const MIN_KEEPALIVE: Duration = Duration::from_millis(100);

/// Upper bound on how long an idle subscriber waits past its keepalive deadline
const KEEPALIVE_CHECK_PERIOD: Duration = Duration::from_secs(1);

/// Event pushed to observers, serialized as `{"type": ..., ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    SensorData {
        data: Reading,
    },
    ConnectionStatus {
        peripheral: PeripheralRole,
        connected: bool,
    },
    ControlUpdate {
        data: ControlStatus,
        reason: String,
    },
    Keepalive {
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    /// First message of every subscription
    InitialData {
        sensor_data: Option<Reading>,
        control_status: ControlStatus,
    },
}

impl MonitorEvent {
    pub fn to_json(&self) -> String {
        // Serialization of these types cannot fail: no maps with non-string keys
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

pub type SubscriberId = u64;

/// Receiving end of one observer
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<MonitorEvent>,
}

#[derive(Debug)]
struct Subscriber {
    sender: mpsc::Sender<MonitorEvent>,
    last_sent: Instant,
}

#[derive(Debug, Default)]
struct Registry {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, Subscriber>,
}

#[derive(Debug, Clone)]
pub struct StateBroadcaster {
    queue: mpsc::Sender<MonitorEvent>,
    registry: Arc<Mutex<Registry>>,
    subscriber_buffer: usize,
}

/// Drains the event queue; run it on its own task
#[derive(Debug)]
pub struct BroadcastWorker {
    queue: mpsc::Receiver<MonitorEvent>,
    registry: Arc<Mutex<Registry>>,
    keepalive: Duration,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StateBroadcaster {
    pub fn new(
        queue_capacity: usize,
        subscriber_buffer: usize,
        keepalive: Duration,
    ) -> (Self, BroadcastWorker) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let registry = Arc::new(Mutex::new(Registry::default()));

        let broadcaster = StateBroadcaster {
            queue: tx,
            registry: Arc::clone(&registry),
            subscriber_buffer: subscriber_buffer.max(1),
        };
        let worker = BroadcastWorker {
            queue: rx,
            registry,
            keepalive: keepalive.max(MIN_KEEPALIVE),
        };
        (broadcaster, worker)
    }

    pub fn subscribe(&self) -> Subscription {
        self.register(|| None)
    }

    /// Subscribe and queue a greeting ahead of any broadcast event
    ///
    /// `greeting` runs while the subscriber set is locked, so an event
    /// fanned out before registration is already reflected in it and every
    /// later event is delivered after it.
    pub fn subscribe_with<F>(&self, greeting: F) -> Subscription
    where
        F: FnOnce() -> MonitorEvent,
    {
        self.register(|| Some(greeting()))
    }

    fn register<F>(&self, greeting: F) -> Subscription
    where
        F: FnOnce() -> Option<MonitorEvent>,
    {
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);

        let mut registry = lock(&self.registry);
        if let Some(event) = greeting() {
            // Fresh channel with capacity >= 1, cannot be full
            let _ = tx.try_send(event);
        }
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.insert(
            id,
            Subscriber {
                sender: tx,
                last_sent: Instant::now(),
            },
        );
        info!(
            "Observer {} subscribed ({} active)",
            id,
            registry.subscribers.len()
        );

        Subscription { id, events: rx }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = lock(&self.registry).subscribers.remove(&id).is_some();
        if removed {
            info!("Observer {} unsubscribed", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    /// Queue an event for delivery. Never blocks; returns false if dropped.
    pub fn publish(&self, event: MonitorEvent) -> bool {
        match self.queue.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Event queue full, dropping {:?}", event_name(&event));
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Broadcaster stopped, event discarded");
                false
            }
        }
    }
}

fn event_name(event: &MonitorEvent) -> &'static str {
    match event {
        MonitorEvent::SensorData { .. } => "sensor_data",
        MonitorEvent::ConnectionStatus { .. } => "connection_status",
        MonitorEvent::ControlUpdate { .. } => "control_update",
        MonitorEvent::Keepalive { .. } => "keepalive",
        MonitorEvent::InitialData { .. } => "initial_data",
    }
}

impl BroadcastWorker {
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut ticker = interval(self.keepalive.min(KEEPALIVE_CHECK_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.queue.recv() => match event {
                    Some(event) => self.fan_out(&event),
                    None => break,
                },
                _ = ticker.tick() => self.send_keepalives(Instant::now()),
                _ = shutdown.wait() => break,
            }
        }
        debug!("Broadcast worker stopped");
    }

    /// Deliver one event to every subscriber, dropping the ones that fail
    fn fan_out(&self, event: &MonitorEvent) {
        let mut registry = lock(&self.registry);
        let now = Instant::now();
        registry
            .subscribers
            .retain(|id, subscriber| deliver(*id, subscriber, event.clone(), now));
    }

    fn send_keepalives(&self, now: Instant) {
        let mut registry = lock(&self.registry);
        let keepalive = self.keepalive;
        registry.subscribers.retain(|id, subscriber| {
            if now.duration_since(subscriber.last_sent) < keepalive {
                return true;
            }
            let event = MonitorEvent::Keepalive {
                timestamp: OffsetDateTime::now_utc(),
            };
            deliver(*id, subscriber, event, now)
        });
    }
}

fn deliver(id: SubscriberId, subscriber: &mut Subscriber, event: MonitorEvent, now: Instant) -> bool {
    match subscriber.sender.try_send(event) {
        Ok(()) => {
            subscriber.last_sent = now;
            true
        }
        Err(TrySendError::Closed(_)) => {
            info!("Observer {} disconnected, removing", id);
            false
        }
        Err(TrySendError::Full(_)) => {
            warn!("Observer {} is not keeping up, removing", id);
            false
        }
    }
}
