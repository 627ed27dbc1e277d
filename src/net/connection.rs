//! Session identity and lifetime tracking.
//!
//! # Responsibilities
//! - Generate unique session ids for log correlation
//! - Count active sessions so shutdown can drain them

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Relaxed ordering: only uniqueness is needed.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Tracks active sessions for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    active_count: Arc<AtomicU64>,
    drained: Arc<Notify>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active session. The guard decrements on drop.
    pub fn track(&self) -> SessionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        crate::observability::metrics::session_opened();
        SessionGuard {
            active_count: Arc::clone(&self.active_count),
            drained: Arc::clone(&self.drained),
            id: SessionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until no session is active or `deadline` passes.
    ///
    /// Returns `true` if every session finished in time.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let drain = async {
            loop {
                let notified = self.drained.notified();
                if self.active_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(deadline, drain).await.is_ok()
    }
}

/// Held for a session's lifetime.
#[derive(Debug)]
pub struct SessionGuard {
    active_count: Arc<AtomicU64>,
    drained: Arc<Notify>,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.active_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
        crate::observability::metrics::session_released();
        tracing::trace!(session_id = %self.id, "Session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("session-"));
    }

    #[test]
    fn tracker_counts() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(guard1.id(), guard2.id());

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_completes_when_last_guard_drops() {
        let tracker = SessionTracker::new();
        let guard = tracker.track();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_for_drain(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn drain_times_out_with_active_session() {
        let tracker = SessionTracker::new();
        let _guard = tracker.track();
        assert!(!tracker.wait_for_drain(Duration::from_millis(20)).await);
    }
}
