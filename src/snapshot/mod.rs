//! The versioned, timestamped state entity being protected.

mod inventory;

pub use inventory::*;

use serde::{Deserialize, Serialize};

use crate::core::{PersistError, PersistResult};
use crate::crypto::{integrity_hash, verify_integrity};

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// Read from the secure local store.
    Local,
    /// Fetched from the remote store.
    Remote,
    /// Rebuilt from an emergency backup.
    Emergency,
    /// Freshly synthesized.
    #[default]
    Default,
}

/// A player's progress at a point in time.
///
/// `integrity_hash` covers `user_id`, `version`, `last_saved_at` and
/// `inventory`. `source`, `repaired` and `integrity_failed` describe how this
/// in-memory copy was obtained and are not part of the hashed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Opaque user id from the auth layer.
    pub user_id: String,
    /// Monotonic save counter of the writer.
    pub version: u64,
    /// Milliseconds since the Unix epoch.
    pub last_saved_at: u64,
    /// Player resources.
    pub inventory: Inventory,
    /// Hex SHA-256 over the hashed fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_hash: Option<String>,
    /// Origin of this copy.
    #[serde(default)]
    pub source: SourceTag,
    /// Invalid numbers were coerced to defaults.
    #[serde(skip)]
    pub repaired: bool,
    /// The stored hash did not match on read.
    #[serde(skip)]
    pub integrity_failed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedFields<'a> {
    user_id: &'a str,
    version: u64,
    last_saved_at: u64,
    inventory: &'a Inventory,
}

impl StateSnapshot {
    /// A fresh snapshot for a player with no saved progress.
    pub fn default_for(user_id: &str, now_ms: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            version: 0,
            last_saved_at: now_ms,
            inventory: Inventory::starting(now_ms),
            integrity_hash: None,
            source: SourceTag::Default,
            repaired: false,
            integrity_failed: false,
        }
    }

    /// Canonical bytes the integrity hash is computed over.
    pub fn hashed_payload(&self) -> PersistResult<Vec<u8>> {
        let fields = HashedFields {
            user_id: &self.user_id,
            version: self.version,
            last_saved_at: self.last_saved_at,
            inventory: &self.inventory,
        };
        Ok(serde_json::to_vec(&fields)?)
    }

    /// Recompute and store the integrity hash.
    pub fn seal(&mut self) -> PersistResult<()> {
        let payload = self.hashed_payload()?;
        self.integrity_hash = Some(integrity_hash(&self.user_id, &payload));
        Ok(())
    }

    /// Whether the stored hash matches the current fields.
    pub fn verify(&self) -> bool {
        let Some(expected) = self.integrity_hash.as_deref() else {
            return false;
        };
        self.hashed_payload()
            .map(|payload| verify_integrity(&self.user_id, &payload, expected))
            .unwrap_or(false)
    }

    /// Structural problems, empty when valid.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.user_id.is_empty() {
            out.push("userId is empty".to_string());
        }
        out.extend(self.inventory.problems());
        out
    }

    /// Reject structurally invalid snapshots.
    pub fn validate(&self) -> PersistResult<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(PersistError::InvalidSnapshot(problems.join("; ")))
        }
    }

    /// Coerce invalid numeric fields and flag the snapshot as repaired.
    pub fn repair(&mut self) -> bool {
        let changed = self.inventory.repair();
        if changed {
            self.repaired = true;
        }
        changed
    }

    /// Equal in every persisted domain field, ignoring origin flags and hash.
    pub fn same_state(&self, other: &Self) -> bool {
        self.user_id == other.user_id
            && self.version == other.version
            && self.last_saved_at == other.last_saved_at
            && self.inventory == other.inventory
    }

    /// Copy tagged with a new source.
    pub fn with_source(mut self, source: SourceTag) -> Self {
        self.source = source;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StateSnapshot {
        let mut s = StateSnapshot::default_for("u1", 1_000);
        s.version = 3;
        s.inventory.set("coins", 42.0);
        s
    }

    #[test]
    fn test_default_for() {
        let s = StateSnapshot::default_for("u1", 5);
        assert_eq!(s.version, 0);
        assert_eq!(s.source, SourceTag::Default);
        assert_eq!(s.inventory.accruing["energy"].last_update_timestamp, 5);
        assert!(s.problems().is_empty());
    }

    #[test]
    fn test_seal_and_verify() {
        let mut s = snapshot();
        assert!(!s.verify());

        s.seal().unwrap();
        assert!(s.verify());

        s.inventory.set("coins", 43.0);
        assert!(!s.verify());
    }

    #[test]
    fn test_hash_ignores_source_and_flags() {
        let mut s = snapshot();
        s.seal().unwrap();

        let mut other = s.clone().with_source(SourceTag::Remote);
        other.repaired = true;
        assert!(other.verify());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut s = snapshot();
        s.user_id.clear();
        s.inventory.set("coins", f64::INFINITY);

        match s.validate() {
            Err(PersistError::InvalidSnapshot(msg)) => {
                assert!(msg.contains("userId"));
                assert!(msg.contains("coins"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_repair_flags_snapshot() {
        let mut s = snapshot();
        assert!(!s.repair());
        assert!(!s.repaired);

        s.inventory.set("coins", f64::NAN);
        assert!(s.repair());
        assert!(s.repaired);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_flags_not_serialized() {
        let mut s = snapshot();
        s.integrity_failed = true;
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("integrityFailed"));

        let back: StateSnapshot = serde_json::from_str(&json).unwrap();
        assert!(!back.integrity_failed);
        assert!(back.same_state(&s));
    }
}
