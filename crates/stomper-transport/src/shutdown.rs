//! Stop signal for accept loops.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable, one-way stop flag. Once triggered it stays triggered.
///
/// Listening transports race every `accept` against it, so a clone handed
/// out before the transport moves into a server loop can still stop that
/// loop.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called on any
    /// clone, immediately if it already was.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let stopped = *rx.borrow_and_update();
            if stopped || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_trigger_on_clone_wakes_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = signal.clone();
        let waiting = tokio::spawn(async move { waiter.triggered().await });

        assert!(!signal.is_triggered());
        signal.trigger();

        timeout(Duration::from_secs(2), waiting).await.unwrap().unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_after_trigger_returns_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        timeout(Duration::from_millis(100), signal.triggered()).await.unwrap();
    }
}
