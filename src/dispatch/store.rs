//! Interface status table shared by every session of a server.

use std::sync::Arc;

use dashmap::DashMap;

use crate::protocol::InterfaceStatus;

/// Concurrent map of interface name to last status set.
///
/// Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct InterfaceStore {
    inner: Arc<DashMap<String, InterfaceStatus>>,
}

impl InterfaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status of `name`, if it was ever set.
    pub fn status(&self, name: &str) -> Option<InterfaceStatus> {
        self.inner.get(name).map(|entry| *entry.value())
    }

    /// Record `status` for `name`, returning the previous status.
    pub fn set(&self, name: &str, status: InterfaceStatus) -> Option<InterfaceStatus> {
        self.inner.insert(name.to_string(), status)
    }

    pub fn remove(&self, name: &str) -> Option<InterfaceStatus> {
        self.inner.remove(name).map(|(_, status)| status)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let store = InterfaceStore::new();
        let other = store.clone();

        assert_eq!(store.set("eth0", InterfaceStatus::Down), None);
        assert_eq!(other.status("eth0"), Some(InterfaceStatus::Down));
        assert_eq!(other.set("eth0", InterfaceStatus::Up), Some(InterfaceStatus::Down));
        assert_eq!(store.remove("eth0"), Some(InterfaceStatus::Up));
        assert!(other.is_empty());
    }
}
