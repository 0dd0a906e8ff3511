//! Cooperative shutdown signal shared by the scheduler and the server.

use std::time::Duration;

use tokio::sync::watch;

/// Fires the shutdown signal. Dropping it counts as firing.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Cheap to clone; every suspension point in the engine waits on one.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown { rx: self.tx.subscribe() }
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `dur` unless shutdown arrives first.
    /// Returns `true` when the full duration elapsed.
    pub async fn sleep(&mut self, dur: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(dur) => true,
            _ = self.wait() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_completes_without_trigger() {
        let (_trigger, mut shutdown) = channel();
        assert!(shutdown.sleep(Duration::from_millis(10)).await);
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_interrupts_sleep_promptly() {
        let (trigger, mut shutdown) = channel();
        let started = Instant::now();
        let handle = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.trigger();
        let completed = handle.await.unwrap();
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dropping_trigger_counts_as_shutdown() {
        let (trigger, mut shutdown) = channel();
        drop(trigger);
        assert!(shutdown.is_triggered());
        assert!(!shutdown.sleep(Duration::from_secs(30)).await);
    }

    #[tokio::test]
    async fn test_subscribers_see_trigger() {
        let (trigger, _shutdown) = channel();
        let mut late = trigger.subscribe();
        trigger.trigger();
        late.wait().await;
        assert!(late.is_triggered());
    }
}
