//! Core traits, constants, and error types.

mod clock;
mod constants;
mod error;
mod traits;

pub use clock::*;
pub use constants::*;
pub use error::*;
pub use traits::*;
