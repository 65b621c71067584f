//! Fire-and-forget notifications for UI collaborators.

use tokio::sync::broadcast;

/// Capacity of the event channel; slow subscribers miss older events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Save outcome notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A snapshot reached a storage tier.
    StateSaved {
        /// Owner.
        user_id: String,
        /// `"local"` or the remote's reported storage type.
        storage_type: String,
    },
    /// A save failed for good (local write failure or exhausted remote retries).
    StateSaveError {
        /// Owner.
        user_id: String,
        /// Human-readable cause.
        error: String,
    },
}

/// Broadcast channel for [`SyncEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// New bus with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
