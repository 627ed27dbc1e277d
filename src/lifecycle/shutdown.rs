//! Shutdown coordination.

use tokio::sync::watch;

/// Owner of the shutdown signal.
///
/// Unlike a broadcast, a token created after `trigger` still observes it.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A token for one long-running task.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token checked by session and accept loops.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is triggered or the coordinator is dropped.
    pub async fn triggered(&mut self) {
        // An Err means the sender is gone, which is treated as shutdown.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
