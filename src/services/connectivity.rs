//! Connectivity signal source that wakes the workers.

use std::sync::Arc;
use tokio::sync::watch;

/// Reports the device's network state
pub trait ConnectivityProvider: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver observing every transition; the current value counts as seen
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state fed by the platform layer (e.g. an Android network callback)
#[derive(Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes the new state; repeated values are not re-broadcast
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            log::info!("Connectivity changed: {}", if online { "online" } else { "offline" });
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityProvider for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
