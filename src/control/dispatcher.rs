/// Serialized, retried delivery of commands to the actuator
use log::{debug, info, warn};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout_at, Duration, Instant};

use crate::bluetooth::ActuatorLink;
use crate::error::MonitorError;
use crate::models::CommandKind;
use crate::utils::format_datetime;

/// Attempt budget and backoff between connect-and-write cycles
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Deadline for a single connect-write-readback cycle
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            multiplier: 1.5,
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base * multiplier^(attempt-1)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exponent))
    }
}

/// A command owned by the dispatcher until it succeeds or runs out of attempts
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub kind: CommandKind,
    pub attempt: u32,
    pub deadline: Instant,
}

/// Proof of a delivered command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReceipt {
    pub kind: CommandKind,
    pub attempts: u32,
    /// Value read back after the write, if the actuator offered one
    pub acknowledgement: Option<String>,
    pub confirmed_at: OffsetDateTime,
}

/// Holds the single actuator link and guarantees at most one command in flight
pub struct CommandDispatcher<L> {
    link: L,
    in_flight: Mutex<()>,
    policy: RetryPolicy,
}

impl<L: ActuatorLink> CommandDispatcher<L> {
    pub fn new(link: L, policy: RetryPolicy) -> Self {
        CommandDispatcher {
            link,
            in_flight: Mutex::new(()),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Send a command, reporting only whether it was delivered
    pub async fn send(&self, kind: CommandKind) -> bool {
        self.dispatch(kind).await.is_ok()
    }

    /// Deliver `kind` to the actuator
    ///
    /// Fails fast with `ActuatorBusy` if another command is in flight. Otherwise
    /// runs up to `max_attempts` connect-and-write cycles with exponential
    /// backoff in between. A successful write is authoritative; the read-back
    /// acknowledgement is only logged.
    ///
    /// # Returns
    /// A receipt on success, `CommandFailed` once every attempt failed
    pub async fn dispatch(&self, kind: CommandKind) -> Result<CommandReceipt, MonitorError> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            warn!("Actuator busy, '{}' not sent", kind);
            MonitorError::ActuatorBusy
        })?;

        let mut pending = PendingCommand {
            kind,
            attempt: 0,
            deadline: Instant::now(),
        };

        loop {
            pending.attempt += 1;
            pending.deadline = Instant::now() + self.policy.attempt_timeout;
            debug!(
                "Sending '{}' to actuator (attempt {}/{})",
                kind, pending.attempt, self.policy.max_attempts
            );

            match timeout_at(pending.deadline, self.link.transmit(kind)).await {
                Ok(Ok(acknowledgement)) => {
                    log_acknowledgement(kind, acknowledgement.as_deref());
                    let receipt = CommandReceipt {
                        kind,
                        attempts: pending.attempt,
                        acknowledgement,
                        confirmed_at: OffsetDateTime::now_utc(),
                    };
                    info!(
                        "Actuator accepted '{}' at {} (attempt {})",
                        kind,
                        format_datetime(&receipt.confirmed_at),
                        receipt.attempts
                    );
                    return Ok(receipt);
                }
                Ok(Err(e)) => warn!(
                    "Attempt {} to send '{}' failed ({}): {}",
                    pending.attempt,
                    kind,
                    e.kind(),
                    e
                ),
                Err(_) => warn!(
                    "Attempt {} to send '{}' timed out after {:?}",
                    pending.attempt, kind, self.policy.attempt_timeout
                ),
            }

            if pending.attempt >= self.policy.max_attempts {
                break;
            }
            sleep(self.policy.delay_after(pending.attempt)).await;
        }

        warn!(
            "Giving up on '{}' after {} attempts",
            kind, pending.attempt
        );
        Err(MonitorError::CommandFailed {
            kind,
            attempts: pending.attempt,
        })
    }
}

fn log_acknowledgement(kind: CommandKind, acknowledgement: Option<&str>) {
    match acknowledgement {
        Some(ack) if ack.trim().eq_ignore_ascii_case(kind.as_token()) => {
            debug!("Actuator confirmed '{}'", kind)
        }
        Some(ack) => debug!("Actuator answered '{}' to '{}'", ack.trim(), kind),
        None => debug!("No read-back for '{}'", kind),
    }
}
