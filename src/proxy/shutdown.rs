//! Cancellation signal shared by probe workers

use tokio::sync::watch;

/// Receiving half: cheap to clone, one per worker
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half, held by whoever may stop the run (signal handler, TUI)
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected trigger / signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the trigger fired. Pends forever if the trigger is gone
    /// without firing.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_all_receivers() {
        let (trigger, shutdown) = shutdown_channel();
        let mut a = shutdown.clone();
        let mut b = trigger.subscribe();
        assert!(!shutdown.is_cancelled());

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), async {
            a.cancelled().await;
            b.cancelled().await;
        })
        .await
        .unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut never = Shutdown::never();
        assert!(!never.is_cancelled());
        let waited = tokio::time::timeout(Duration::from_millis(50), never.cancelled()).await;
        assert!(waited.is_err());
    }
}
