//! Error types for progress-sync.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`KeyValueStore`](super::KeyValueStore) backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend refused the write because it is full.
    #[error("storage quota exceeded writing {key}")]
    QuotaExceeded {
        /// Key being written.
        key: String,
    },

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors raised by a [`RemoteStore`](super::RemoteStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No network route to the remote store.
    #[error("remote store unreachable")]
    Unavailable,

    /// The RPC did not complete in time.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote store refused the request.
    #[error("remote rejected request: {0}")]
    Rejected(String),

    /// The remote store already holds a newer version.
    #[error("remote holds version {remote}, sent {sent}")]
    VersionConflict {
        /// Version we sent.
        sent: u64,
        /// Version the remote holds.
        remote: u64,
    },
}

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Top-level persistence errors.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Write refused for lack of space, even after eviction.
    #[error("storage quota exceeded for {key}")]
    StorageQuotaExceeded {
        /// Key that could not be written.
        key: String,
    },

    /// Stored hash does not match the payload.
    #[error("integrity mismatch for user {user_id}")]
    IntegrityMismatch {
        /// Owner of the entry.
        user_id: String,
    },

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store unreachable.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// Remote call exceeded its deadline.
    #[error("network timeout after {0:?}")]
    NetworkTimeout(Duration),

    /// Remote store refused the snapshot.
    #[error("remote rejected: {0}")]
    RemoteRejected(String),

    /// Local and remote disagree on the latest version.
    #[error("version conflict: local {local}, remote {remote}")]
    VersionConflict {
        /// Local version.
        local: u64,
        /// Remote version.
        remote: u64,
    },

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Snapshot failed structural validation.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A mutation tried to spend more than is available.
    #[error("insufficient {resource}: requested {requested}, available {available}")]
    InsufficientResource {
        /// Resource name.
        resource: String,
        /// Amount requested.
        requested: f64,
        /// Amount available.
        available: f64,
    },

    /// A mutation referenced a resource the inventory does not hold.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Operation requires an active session.
    #[error("no active session")]
    NoSession,

    /// The session's canonical snapshot was never loaded, so writing it
    /// would overwrite stored progress with a placeholder.
    #[error("session for {0} is not loaded")]
    NotLoaded(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StorageError> for PersistError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QuotaExceeded { key } => PersistError::StorageQuotaExceeded { key },
            StorageError::Backend(msg) => PersistError::Storage(msg),
        }
    }
}

impl From<RemoteError> for PersistError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable => PersistError::NetworkUnavailable,
            RemoteError::Timeout(after) => PersistError::NetworkTimeout(after),
            RemoteError::Rejected(reason) => PersistError::RemoteRejected(reason),
            RemoteError::VersionConflict { sent, remote } => PersistError::VersionConflict {
                local: sent,
                remote,
            },
        }
    }
}

/// Result alias used across the crate.
pub type PersistResult<T> = Result<T, PersistError>;
