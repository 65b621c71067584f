//! Collaborator seams.
//!
//! The engine never talks to a concrete storage backend, network transport or
//! wall clock directly. Everything external is reached through these traits so
//! the embedding application (and the tests) decide what sits behind them.

use async_trait::async_trait;
use tokio::sync::watch;

use super::error::{RemoteError, StorageError};
use crate::snapshot::StateSnapshot;

/// Synchronous string-keyed byte store (the local key-value tier).
///
/// Only [`SecureLocalStore`](crate::storage::SecureLocalStore) and
/// [`EmergencyBackupManager`](crate::storage::EmergencyBackupManager) hold one.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// Returns [`StorageError::QuotaExceeded`] when the backend is full.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List every key currently stored.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Acknowledgement of a remote save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSaveAck {
    /// Backend tier the remote used (e.g. `"cloud"`).
    pub storage_type: String,
}

/// Authoritative remote store, consumed as an RPC.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Persist a snapshot at `version`.
    async fn save(
        &self,
        user_id: &str,
        snapshot: &StateSnapshot,
        version: u64,
    ) -> Result<RemoteSaveAck, RemoteError>;

    /// Fetch the latest snapshot, if the remote has one.
    async fn load(&self, user_id: &str) -> Result<Option<StateSnapshot>, RemoteError>;

    /// Store a side copy that is never served by `load`.
    async fn backup(
        &self,
        user_id: &str,
        snapshot: &StateSnapshot,
        version: u64,
    ) -> Result<(), RemoteError>;
}

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now_ms(&self) -> u64;
}

/// Network-availability signal.
pub trait NetworkMonitor: Send + Sync {
    /// Whether the remote store is currently reachable.
    fn is_online(&self) -> bool;

    /// Change notifications; the value is the online flag.
    fn subscribe(&self) -> watch::Receiver<bool>;
}
