//! Secure local store.
//!
//! Each user owns three keys in the shared [`KeyValueStore`]:
//!
//! ```text
//! secure:<user_id>          sealed envelope of the current snapshot
//! secure:<user_id>:backup   the envelope it replaced
//! sync-metadata:<user_id>   SyncMetadata (plain JSON)
//! ```
//!
//! An envelope is `{format, nonce, ciphertext, hash}`: the hashed snapshot
//! fields sealed with [`PayloadCipher`] plus the integrity hash over those
//! plaintext bytes. Writes for one user are serialized; a save fully resolves
//! (rotation, write, read-back) before the next one for that user begins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::emergency::EmergencyBackupManager;
use super::metadata::SyncMetadata;
use crate::core::{
    AEAD_NONCE_SIZE, BACKUP_KEY_SUFFIX, ENVELOPE_FORMAT, KeyValueStore, METADATA_KEY_PREFIX,
    PRIMARY_KEY_PREFIX, PersistError, PersistResult, StorageError,
};
use crate::crypto::{PayloadCipher, integrity_hash, verify_integrity};
use crate::snapshot::{Inventory, SourceTag, StateSnapshot};

/// Primary key for a user.
pub fn primary_key(user_id: &str) -> String {
    format!("{PRIMARY_KEY_PREFIX}{user_id}")
}

/// Backup slot key for a user.
pub fn backup_key(user_id: &str) -> String {
    format!("{PRIMARY_KEY_PREFIX}{user_id}{BACKUP_KEY_SUFFIX}")
}

/// Metadata key for a user.
pub fn metadata_key(user_id: &str) -> String {
    format!("{METADATA_KEY_PREFIX}{user_id}")
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format: u8,
    nonce: String,
    ciphertext: String,
    hash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredFields {
    user_id: String,
    version: u64,
    last_saved_at: u64,
    inventory: Inventory,
}

/// Encrypting, hashing, backup-rotating wrapper around the local store.
pub struct SecureLocalStore {
    store: Arc<dyn KeyValueStore>,
    cipher: PayloadCipher,
    emergency: Arc<EmergencyBackupManager>,
    critical_prefixes: Vec<String>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SecureLocalStore {
    /// Wrap `store`. Keys starting with any of `critical_prefixes` survive
    /// quota eviction.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cipher: PayloadCipher,
        emergency: Arc<EmergencyBackupManager>,
        critical_prefixes: Vec<String>,
    ) -> Self {
        Self {
            store,
            cipher,
            emergency,
            critical_prefixes,
            write_locks: Mutex::default(),
        }
    }

    /// The emergency manager consulted by [`recover_from_backup`](Self::recover_from_backup).
    pub fn emergency(&self) -> &Arc<EmergencyBackupManager> {
        &self.emergency
    }

    /// Per-user write lock. Entries nobody holds or waits on are dropped
    /// here, so the map only tracks users with work in flight.
    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|user, lock| user == user_id || Arc::strong_count(lock) > 1);
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Drop the user's lock entry once no one else holds it.
    fn release_lock(&self, user_id: &str) {
        let mut locks = self.write_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(user_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(user_id);
        }
    }

    /// Seal and persist `snapshot` as the user's primary entry.
    ///
    /// Invalid numbers are coerced first (the returned copy is flagged
    /// `repaired`). The hash is recomputed, the previous entry is rotated into
    /// the backup slot, and the written entry is read back and verified before
    /// success is reported. Returns the sealed snapshot as stored.
    pub async fn save(&self, user_id: &str, snapshot: &StateSnapshot) -> PersistResult<StateSnapshot> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        if snapshot.user_id != user_id {
            return Err(PersistError::InvalidSnapshot(format!(
                "snapshot for {} saved under {user_id}",
                snapshot.user_id
            )));
        }

        let mut snapshot = snapshot.clone();
        if snapshot.repair() {
            warn!(user_id, version = snapshot.version, "coerced invalid numeric fields before save");
        }
        snapshot.validate()?;
        snapshot.seal()?;

        let blob = self.encode(&snapshot)?;
        let primary = primary_key(user_id);

        self.rotate_backup(user_id)?;
        self.write_with_eviction(user_id, &primary, &blob)?;

        let stored = self
            .store
            .get(&primary)?
            .ok_or_else(|| PersistError::Storage(format!("{primary} missing after write")))?;
        let readback = self.decode(user_id, &stored)?;
        if readback.integrity_failed || !readback.same_state(&snapshot) {
            return Err(PersistError::IntegrityMismatch {
                user_id: user_id.to_string(),
            });
        }

        let mut metadata = self.read_metadata(user_id)?;
        metadata.record_local_save(snapshot.version, snapshot.last_saved_at);
        self.write_metadata(user_id, &metadata)?;

        debug!(user_id, version = snapshot.version, "local save verified");
        Ok(snapshot.with_source(SourceTag::Local))
    }

    /// Read and open the user's primary entry.
    ///
    /// A hash mismatch does not drop the data: the snapshot comes back with
    /// `integrity_failed` set. An entry that cannot be opened or parsed is an
    /// error; callers fall back to [`recover_from_backup`](Self::recover_from_backup).
    pub async fn load(&self, user_id: &str) -> PersistResult<Option<StateSnapshot>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let Some(blob) = self.store.get(&primary_key(user_id))? else {
            return Ok(None);
        };
        let snapshot = self.decode(user_id, &blob)?;
        if snapshot.integrity_failed {
            warn!(user_id, version = snapshot.version, "local snapshot failed integrity check");
        }
        Ok(Some(snapshot))
    }

    /// Recover from the backup slot, then from the emergency capture.
    ///
    /// A recovered snapshot becomes the new primary entry.
    pub async fn recover_from_backup(&self, user_id: &str) -> PersistResult<Option<StateSnapshot>> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        if let Some(blob) = self.store.get(&backup_key(user_id))? {
            match self.decode(user_id, &blob) {
                Ok(snapshot) if !snapshot.integrity_failed && snapshot.problems().is_empty() => {
                    self.write_with_eviction(user_id, &primary_key(user_id), &blob)?;
                    info!(user_id, version = snapshot.version, "recovered from backup slot");
                    return Ok(Some(snapshot));
                }
                Ok(_) => warn!(user_id, "backup slot failed validation"),
                Err(e) => warn!(user_id, error = %e, "backup slot unreadable"),
            }
        }

        if let Some(record) = self.emergency.latest(user_id)? {
            let mut snapshot = record.to_snapshot();
            snapshot.repair();
            snapshot.seal()?;
            let blob = self.encode(&snapshot)?;
            self.write_with_eviction(user_id, &primary_key(user_id), &blob)?;
            info!(user_id, version = snapshot.version, attempt = %record.attempt_id, "recovered from emergency capture");
            return Ok(Some(snapshot));
        }

        Ok(None)
    }

    /// The user's sync metadata, default if absent or unreadable.
    pub async fn metadata(&self, user_id: &str) -> PersistResult<SyncMetadata> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.read_metadata(user_id)
    }

    /// Overwrite the user's sync metadata.
    pub async fn set_metadata(&self, user_id: &str, metadata: &SyncMetadata) -> PersistResult<()> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        self.write_metadata(user_id, metadata)
    }

    /// Remove every local entry of the user, emergency capture included.
    pub async fn clear(&self, user_id: &str) -> PersistResult<()> {
        let lock = self.user_lock(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.remove_entries(user_id)
        };
        drop(lock);
        self.release_lock(user_id);
        result
    }

    fn remove_entries(&self, user_id: &str) -> PersistResult<()> {
        self.store.remove(&primary_key(user_id))?;
        self.store.remove(&backup_key(user_id))?;
        self.store.remove(&metadata_key(user_id))?;
        self.emergency.clear(user_id)?;
        info!(user_id, "local progress cleared");
        Ok(())
    }

    /// Move the current primary into the backup slot, unless it is unreadable,
    /// in which case the existing backup is the better recovery point.
    fn rotate_backup(&self, user_id: &str) -> PersistResult<()> {
        let Some(previous) = self.store.get(&primary_key(user_id))? else {
            return Ok(());
        };
        match self.decode(user_id, &previous) {
            Ok(snapshot) if !snapshot.integrity_failed => {
                self.write_with_eviction(user_id, &backup_key(user_id), &previous)
            }
            _ => {
                warn!(user_id, "primary entry unreadable, keeping existing backup");
                Ok(())
            }
        }
    }

    fn write_with_eviction(&self, user_id: &str, key: &str, value: &[u8]) -> PersistResult<()> {
        match self.store.set(key, value) {
            Ok(()) => Ok(()),
            Err(StorageError::QuotaExceeded { .. }) => {
                let evicted = self.evict(user_id)?;
                warn!(user_id, key, evicted, "storage quota exceeded, retrying after eviction");
                Ok(self.store.set(key, value)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every key that is neither critical nor one of the user's own
    /// primary, backup or metadata entries.
    fn evict(&self, user_id: &str) -> PersistResult<usize> {
        let keep = [primary_key(user_id), backup_key(user_id), metadata_key(user_id)];
        let mut evicted = 0;
        for key in self.store.keys()? {
            let critical = self.critical_prefixes.iter().any(|p| key.starts_with(p.as_str()));
            if critical || keep.contains(&key) {
                continue;
            }
            self.store.remove(&key)?;
            evicted += 1;
        }
        Ok(evicted)
    }

    fn encode(&self, snapshot: &StateSnapshot) -> PersistResult<Vec<u8>> {
        let payload = snapshot.hashed_payload()?;
        let hash = match &snapshot.integrity_hash {
            Some(hash) => hash.clone(),
            None => integrity_hash(&snapshot.user_id, &payload),
        };
        let sealed = self.cipher.seal(&snapshot.user_id, &payload)?;
        let envelope = Envelope {
            format: ENVELOPE_FORMAT,
            nonce: hex::encode(sealed.nonce),
            ciphertext: hex::encode(sealed.ciphertext),
            hash,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(&self, user_id: &str, blob: &[u8]) -> PersistResult<StateSnapshot> {
        let envelope: Envelope = serde_json::from_slice(blob)?;
        if envelope.format != ENVELOPE_FORMAT {
            return Err(PersistError::InvalidSnapshot(format!(
                "unsupported envelope format {}",
                envelope.format
            )));
        }

        let nonce: [u8; AEAD_NONCE_SIZE] = hex::decode(&envelope.nonce)
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| PersistError::InvalidSnapshot("malformed nonce".into()))?;
        let ciphertext = hex::decode(&envelope.ciphertext)
            .map_err(|e| PersistError::InvalidSnapshot(format!("malformed ciphertext: {e}")))?;

        let payload = self.cipher.open(user_id, &nonce, &ciphertext)?;
        let verified = verify_integrity(user_id, &payload, &envelope.hash);
        let fields: StoredFields = serde_json::from_slice(&payload)?;

        Ok(StateSnapshot {
            integrity_failed: !verified || fields.user_id != user_id,
            user_id: fields.user_id,
            version: fields.version,
            last_saved_at: fields.last_saved_at,
            inventory: fields.inventory,
            integrity_hash: Some(envelope.hash),
            source: SourceTag::Local,
            repaired: false,
        })
    }

    fn read_metadata(&self, user_id: &str) -> PersistResult<SyncMetadata> {
        let Some(bytes) = self.store.get(&metadata_key(user_id))? else {
            return Ok(SyncMetadata::default());
        };
        Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(user_id, error = %e, "unreadable sync metadata, starting fresh");
            SyncMetadata::default()
        }))
    }

    fn write_metadata(&self, user_id: &str, metadata: &SyncMetadata) -> PersistResult<()> {
        let bytes = serde_json::to_vec(metadata)?;
        self.write_with_eviction(user_id, &metadata_key(user_id), &bytes)
    }
}
