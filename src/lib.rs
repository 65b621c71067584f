//! # progress-sync
//!
//! Tiered persistence for a player's mutable progress. Progress lives in
//! three unreliable tiers that are kept eventually consistent without ever
//! silently discarding data:
//!
//! - **Local**: a sealed, hashed entry per user with a rotating backup slot
//! - **Remote**: the authoritative store, reached through an abstract RPC
//! - **Emergency**: minimal captures in an independent, size-bounded store
//!
//! ## Modules
//!
//! - [`core`]: Collaborator traits, constants, and error types
//! - [`crypto`]: Envelope sealing (XChaCha20-Poly1305) and integrity hashing
//! - [`snapshot`]: The versioned [`StateSnapshot`] entity
//! - [`storage`]: [`SecureLocalStore`] and [`EmergencyBackupManager`]
//! - [`remote`]: In-memory remote store and network signal
//! - [`sync`]: Offline accrual, conflict resolution, the sync queue and the
//!   [`SyncCoordinator`]
//! - [`config`]: [`EngineConfig`] and its builder
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use progress_sync::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PersistError> {
//! let config = EngineConfig::default();
//! let collaborators = Collaborators::new(
//!     &config,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryStore::new()),
//!     DeviceSecret::generate(),
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(NetworkStatus::new(true)),
//!     Arc::new(SystemClock),
//! );
//! let engine = SyncCoordinator::new(config, collaborators)?;
//!
//! let snapshot = engine.load("player-1").await;
//! assert_eq!(snapshot.version, 0);
//!
//! engine.save(MutationEvent::new().add("coins", 10.0)).await?;
//! engine.flush().await?;
//! assert_eq!(engine.canonical().await.map(|s| s.version), Some(1));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Core module
pub mod core;

// Engine configuration
pub mod config;

// Envelope crypto
pub mod crypto;

// Snapshot entity
pub mod snapshot;

// Local tiers
pub mod storage;

// Remote tier helpers
pub mod remote;

// Sync layer
pub mod sync;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::core::*;
    pub use crate::crypto::{DeviceSecret, PayloadCipher};
    pub use crate::remote::*;
    pub use crate::snapshot::*;
    pub use crate::storage::*;
    pub use crate::sync::*;
}

// Re-export commonly used items at crate root
pub use config::{EngineConfig, EngineConfigBuilder};
pub use core::{PersistError, PersistResult};
pub use snapshot::{SourceTag, StateSnapshot};
pub use storage::{EmergencyBackupManager, SecureLocalStore};
pub use sync::{
    Collaborators, ConflictResolver, MutationEvent, OfflineProgressCalculator, SyncCoordinator,
    SyncEvent, SyncQueue,
};
