/// Process-wide shutdown signal shared by every long-lived task
use std::future::Future;
use tokio::sync::watch;

/// Fires the shutdown signal. Dropping the trigger also counts as shutdown.
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        self.sender.send_replace(true);
    }
}

/// Cloneable listener handed to each task
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once shutdown has been requested, immediately if it already was
    pub async fn wait(&mut self) {
        // An Err means the trigger is gone, which is treated the same way
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }

    /// Drive `work` to completion unless shutdown comes first, in which case
    /// `work` is dropped and None returned
    pub async fn run_until<F: Future>(&mut self, work: F) -> Option<F::Output> {
        tokio::select! {
            output = work => Some(output),
            _ = self.wait() => None,
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn wait_returns_after_fire() {
        let (trigger, shutdown) = channel();
        let mut listener = shutdown.clone();

        let waiter = tokio::spawn(async move { listener.wait().await });
        trigger.fire();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("listener should wake")
            .unwrap();
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn run_until_abandons_hung_work() {
        let (trigger, mut shutdown) = channel();
        let mut listener = shutdown.clone();
        assert_eq!(listener.run_until(async { 7 }).await, Some(7));

        let hung = tokio::spawn(async move {
            shutdown
                .run_until(std::future::pending::<()>())
                .await
        });
        trigger.fire();
        let outcome = timeout(Duration::from_secs(1), hung)
            .await
            .expect("hung work should be dropped on shutdown")
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn late_listeners_see_earlier_fire() {
        let (trigger, mut shutdown) = channel();
        trigger.fire();
        timeout(Duration::from_millis(10), shutdown.wait())
            .await
            .expect("already triggered");
    }
}
