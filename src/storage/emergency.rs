//! Minimal high-frequency fallback snapshots.
//!
//! Captures live in their own [`KeyValueStore`] (typically session-scoped), so
//! they survive whatever corrupts the primary store and its backup slot. Only
//! the most recent capture per user is retained.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{EMERGENCY_KEY_PREFIX, KeyValueStore, PersistError, PersistResult, StorageError};
use crate::snapshot::{AccruingResource, Inventory, SourceTag, StateSnapshot};

/// One emergency capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRecord {
    /// Owner.
    pub user_id: String,
    /// Identifies the save attempt that produced this capture.
    pub attempt_id: Uuid,
    /// Capture time (ms since epoch).
    pub captured_at: u64,
    /// Version of the snapshot captured.
    pub version: u64,
    /// Plain counters.
    pub counters: BTreeMap<String, f64>,
    /// Accruing resources.
    pub accruing: BTreeMap<String, AccruingResource>,
}

impl EmergencyRecord {
    fn from_snapshot(snapshot: &StateSnapshot, now_ms: u64) -> Self {
        Self {
            user_id: snapshot.user_id.clone(),
            attempt_id: Uuid::new_v4(),
            captured_at: now_ms,
            version: snapshot.version,
            counters: snapshot.inventory.counters.clone(),
            accruing: snapshot.inventory.accruing.clone(),
        }
    }

    /// Rebuild a snapshot from this capture (unsealed, `source = emergency`).
    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            user_id: self.user_id.clone(),
            version: self.version,
            last_saved_at: self.captured_at,
            inventory: Inventory {
                counters: self.counters.clone(),
                accruing: self.accruing.clone(),
            },
            integrity_hash: None,
            source: SourceTag::Emergency,
            repaired: false,
            integrity_failed: false,
        }
    }
}

fn emergency_key(user_id: &str) -> String {
    format!("{EMERGENCY_KEY_PREFIX}{user_id}")
}

/// Writes and reads emergency captures.
pub struct EmergencyBackupManager {
    store: Arc<dyn KeyValueStore>,
    max_bytes: usize,
    max_entries: usize,
}

impl EmergencyBackupManager {
    /// Manage captures in `store`, refusing captures over `max_bytes` and
    /// keeping at most `max_entries` users.
    pub fn new(store: Arc<dyn KeyValueStore>, max_bytes: usize, max_entries: usize) -> Self {
        Self {
            store,
            max_bytes,
            max_entries: max_entries.max(1),
        }
    }

    /// Capture `snapshot`, replacing the user's previous capture.
    pub fn capture(&self, snapshot: &StateSnapshot, now_ms: u64) -> PersistResult<EmergencyRecord> {
        let record = EmergencyRecord::from_snapshot(snapshot, now_ms);
        let key = emergency_key(&record.user_id);
        let bytes = serde_json::to_vec(&record)?;

        if bytes.len() > self.max_bytes {
            warn!(user_id = %record.user_id, size = bytes.len(), "emergency capture too large");
            return Err(PersistError::StorageQuotaExceeded { key });
        }

        match self.store.set(&key, &bytes) {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded { .. }) => {
                // Other users' captures are the only thing this store may drop.
                self.prune(&record.user_id, 0)?;
                self.store.set(&key, &bytes)?;
            }
            Err(e) => return Err(e.into()),
        }
        self.prune(&record.user_id, self.max_entries - 1)?;

        debug!(user_id = %record.user_id, version = record.version, attempt = %record.attempt_id, "emergency capture written");
        Ok(record)
    }

    /// Capture only if no capture at least as new as `snapshot` exists.
    pub fn ensure(&self, snapshot: &StateSnapshot, now_ms: u64) -> PersistResult<()> {
        let covered = self
            .latest(&snapshot.user_id)?
            .is_some_and(|record| record.version >= snapshot.version);
        if !covered {
            self.capture(snapshot, now_ms)?;
        }
        Ok(())
    }

    /// The user's most recent capture. Unreadable captures count as absent.
    pub fn latest(&self, user_id: &str) -> PersistResult<Option<EmergencyRecord>> {
        let Some(bytes) = self.store.get(&emergency_key(user_id))? else {
            return Ok(None);
        };
        match serde_json::from_slice::<EmergencyRecord>(&bytes) {
            Ok(record) if record.user_id == user_id => Ok(Some(record)),
            Ok(_) => {
                warn!(user_id, "emergency capture belongs to another user");
                Ok(None)
            }
            Err(e) => {
                warn!(user_id, error = %e, "unreadable emergency capture");
                Ok(None)
            }
        }
    }

    /// Drop the user's capture.
    pub fn clear(&self, user_id: &str) -> PersistResult<()> {
        Ok(self.store.remove(&emergency_key(user_id))?)
    }

    /// Keep at most `keep_others` captures besides `user_id`'s, oldest first out.
    fn prune(&self, user_id: &str, keep_others: usize) -> PersistResult<()> {
        let own = emergency_key(user_id);
        let mut others: Vec<(u64, String)> = Vec::new();
        for key in self.store.keys()? {
            if !key.starts_with(EMERGENCY_KEY_PREFIX) || key == own {
                continue;
            }
            let captured_at = self
                .store
                .get(&key)?
                .and_then(|bytes| serde_json::from_slice::<EmergencyRecord>(&bytes).ok())
                .map_or(0, |record| record.captured_at);
            others.push((captured_at, key));
        }

        if others.len() <= keep_others {
            return Ok(());
        }
        others.sort();
        let excess = others.len() - keep_others;
        for (_, key) in others.into_iter().take(excess) {
            debug!(%key, "pruning emergency capture");
            self.store.remove(&key)?;
        }
        Ok(())
    }
}
