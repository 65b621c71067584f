//! Remote tier helpers: an in-memory [`RemoteStore`](crate::core::RemoteStore)
//! and a [`NetworkMonitor`](crate::core::NetworkMonitor) implementation.

mod memory;
mod network;

pub use memory::*;
pub use network::*;
