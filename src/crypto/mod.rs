//! Crypto layer: payload sealing and integrity hashing.

mod hash;
mod seal;

pub use hash::*;
pub use seal::*;
