//! Network-availability signal backed by a `watch` channel.

use tokio::sync::watch;
use tracing::info;

use crate::core::NetworkMonitor;

/// Online/offline flag that the embedding application flips.
#[derive(Debug)]
pub struct NetworkStatus {
    tx: watch::Sender<bool>,
}

impl NetworkStatus {
    /// Start in the given state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Report connectivity. Subscribers are only woken on an actual change.
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
            info!(online, "network state changed");
        }
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for NetworkStatus {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle() {
        let status = NetworkStatus::new(false);
        assert!(!status.is_online());
        status.set_online(true);
        assert!(status.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let status = NetworkStatus::new(false);
        let mut rx = status.subscribe();

        status.set_online(false);
        assert!(!rx.has_changed().unwrap());

        status.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
