//! Per-login session state.

use super::tracker::VersionTracker;
use crate::snapshot::StateSnapshot;
use crate::storage::SyncMetadata;

/// State owned by the coordinator between `login` and `logout`.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Logged-in user.
    pub user_id: String,
    /// The canonical snapshot.
    pub canonical: StateSnapshot,
    /// Version bookkeeping.
    pub tracker: VersionTracker,
    /// Mirror of the persisted sync metadata.
    pub metadata: SyncMetadata,
    /// Canonical has changes not yet written locally.
    pub dirty: bool,
    /// A critical mutation is waiting for the next save.
    pub pending_critical: bool,
    /// `canonical` came from a load rather than the login placeholder.
    pub loaded: bool,
}

impl SessionContext {
    /// Fresh session holding a default placeholder snapshot.
    pub fn new(user_id: &str, now_ms: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            canonical: StateSnapshot::default_for(user_id, now_ms),
            tracker: VersionTracker::new(),
            metadata: SyncMetadata::default(),
            dirty: false,
            pending_critical: false,
            loaded: false,
        }
    }

    /// Whether a remote push is warranted now.
    ///
    /// True for critical changes, when the remote never confirmed a sync, or
    /// when the last confirmed sync is older than `interval_ms`.
    pub fn needs_remote_sync(&self, now_ms: u64, interval_ms: u64) -> bool {
        if self.pending_critical {
            return true;
        }
        match self.metadata.since_remote_sync(now_ms) {
            None => true,
            Some(elapsed) => elapsed >= interval_ms,
        }
    }
}
