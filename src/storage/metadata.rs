//! Per-user sync bookkeeping stored next to the primary entry.

use serde::{Deserialize, Serialize};

/// Contents of `sync-metadata:<user_id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    /// Last successful local save (ms since epoch).
    #[serde(default)]
    pub last_local_save_at: Option<u64>,
    /// Last remote save the remote store acknowledged (ms since epoch).
    #[serde(default)]
    pub last_remote_sync_at: Option<u64>,
    /// Version of the last local save.
    #[serde(default)]
    pub save_version: u64,
    /// Highest version the remote store acknowledged.
    #[serde(default)]
    pub remote_confirmed_version: u64,
}

impl SyncMetadata {
    /// Record a local save.
    pub fn record_local_save(&mut self, version: u64, at_ms: u64) {
        self.last_local_save_at = Some(at_ms);
        self.save_version = self.save_version.max(version);
    }

    /// Record a remote acknowledgement.
    pub fn record_remote_sync(&mut self, version: u64, at_ms: u64) {
        self.last_remote_sync_at = Some(at_ms);
        self.remote_confirmed_version = self.remote_confirmed_version.max(version);
    }

    /// Milliseconds since the last confirmed remote sync, `None` if never.
    pub fn since_remote_sync(&self, now_ms: u64) -> Option<u64> {
        self.last_remote_sync_at.map(|at| now_ms.saturating_sub(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_never_go_back() {
        let mut meta = SyncMetadata::default();
        meta.record_local_save(5, 100);
        meta.record_local_save(3, 200);
        assert_eq!(meta.save_version, 5);
        assert_eq!(meta.last_local_save_at, Some(200));

        meta.record_remote_sync(4, 300);
        meta.record_remote_sync(2, 400);
        assert_eq!(meta.remote_confirmed_version, 4);
        assert_eq!(meta.since_remote_sync(1_000), Some(600));
    }

    #[test]
    fn test_missing_fields_default() {
        let meta: SyncMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(meta, SyncMetadata::default());
        assert_eq!(meta.since_remote_sync(10), None);
    }
}
