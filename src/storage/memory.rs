//! In-memory key-value backend with an optional byte quota.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::core::{KeyValueStore, StorageError};

/// `BTreeMap`-backed [`KeyValueStore`].
///
/// Usage is counted as key bytes plus value bytes. With a quota set, a write
/// that would push usage over it fails with [`StorageError::QuotaExceeded`],
/// the same way a browser-style local storage does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    quota_bytes: Mutex<Option<usize>>,
}

impl MemoryStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses writes beyond `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::default(),
            quota_bytes: Mutex::new(Some(quota_bytes)),
        }
    }

    /// Change or lift the quota.
    pub fn set_quota(&self, quota_bytes: Option<usize>) {
        *self.quota_bytes.lock().unwrap_or_else(|e| e.into_inner()) = quota_bytes;
    }

    /// Bytes currently used.
    pub fn usage_bytes(&self) -> usize {
        self.lock()
            .map(|entries| entries.iter().map(|(k, v)| k.len() + v.len()).sum())
            .unwrap_or(0)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.lock()?;
        let quota = *self.quota_bytes.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(quota) = quota {
            let used: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            let replaced = entries.get(key).map_or(0, |old| key.len() + old.len());
            if used - replaced + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }

        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.keys().unwrap(), vec!["a".to_string()]);

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_quota_rejects_growth() {
        let store = MemoryStore::with_quota(10);
        store.set("k", b"123456789").unwrap();
        assert_eq!(store.usage_bytes(), 10);

        let err = store.set("x", b"1").unwrap_err();
        assert_eq!(err, StorageError::QuotaExceeded { key: "x".into() });
    }

    #[test]
    fn test_quota_counts_replacement() {
        let store = MemoryStore::with_quota(10);
        store.set("k", b"123456789").unwrap();
        // Replacing the value with one of equal size fits.
        store.set("k", b"987654321").unwrap();
        store.set("k", b"1").unwrap();
        store.set("x", b"1").unwrap();
    }

    #[test]
    fn test_lift_quota() {
        let store = MemoryStore::with_quota(1);
        assert!(store.set("key", b"value").is_err());
        store.set_quota(None);
        store.set("key", b"value").unwrap();
    }
}
