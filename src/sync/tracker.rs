//! Version tracker
//!
//! Tracks the save versions of one writer across the local and remote tiers.
//! Each session owns one tracker.

/// Version bookkeeping for a single writer.
///
/// - `current`: version of the last successful local save (monotonic)
/// - `last_enqueued`: highest version handed to the sync queue
/// - `remote_confirmed`: highest version the remote store acknowledged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTracker {
    current: u64,
    last_enqueued: u64,
    remote_confirmed: u64,
}

impl VersionTracker {
    /// Create a tracker at version zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that continues after `version`.
    pub fn with_initial_version(version: u64) -> Self {
        Self {
            current: version,
            last_enqueued: 0,
            remote_confirmed: 0,
        }
    }

    /// Version of the last local save.
    pub fn current_version(&self) -> u64 {
        self.current
    }

    /// Highest version handed to the queue.
    pub fn last_enqueued_version(&self) -> u64 {
        self.last_enqueued
    }

    /// Highest version the remote acknowledged.
    pub fn remote_confirmed_version(&self) -> u64 {
        self.remote_confirmed
    }

    /// Version the next save must carry.
    pub fn next_version(&self) -> u64 {
        self.current + 1
    }

    /// Record a successful local save. Older versions are ignored.
    pub fn commit_save(&mut self, version: u64) {
        if version > self.current {
            self.current = version;
        }
    }

    /// Make sure the next save is numbered after `version` (seen elsewhere).
    pub fn observe_version(&mut self, version: u64) {
        self.commit_save(version);
    }

    /// Record that `version` was handed to the queue.
    pub fn record_enqueued(&mut self, version: u64) {
        if version > self.last_enqueued {
            self.last_enqueued = version;
        }
    }

    /// Record a remote acknowledgement.
    ///
    /// Returns `true` if the acknowledged version is still the current one;
    /// `false` means the acknowledgement is stale.
    pub fn record_remote_ack(&mut self, version: u64) -> bool {
        if version > self.remote_confirmed {
            self.remote_confirmed = version;
        }
        version >= self.current
    }

    /// Whether a saved version exists that was never handed to the queue.
    pub fn has_unqueued_save(&self) -> bool {
        self.current > self.last_enqueued.max(self.remote_confirmed)
    }

    /// Whether the remote holds the current version.
    pub fn is_synchronized(&self) -> bool {
        self.remote_confirmed >= self.current
    }

    /// Reset the tracker to initial state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
