//! Local storage tiers.
//!
//! - [`SecureLocalStore`]: sealed primary entry with backup rotation
//! - [`EmergencyBackupManager`]: independent last-resort captures
//! - [`MemoryStore`]: in-memory [`KeyValueStore`](crate::core::KeyValueStore)

mod emergency;
mod memory;
mod metadata;
mod secure;

pub use emergency::*;
pub use memory::*;
pub use metadata::*;
pub use secure::*;
