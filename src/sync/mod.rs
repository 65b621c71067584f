//! Sync layer
//!
//! Implements:
//! - Monotonic save versions per writer
//! - Idempotent offline accrual
//! - Deterministic local/remote conflict resolution
//! - A retrying, backoff-scheduled outbox of remote saves
//! - The coordinator tying the tiers together behind `save`/`load`

mod coordinator;
mod debounce;
mod events;
mod mutation;
mod offline;
mod queue;
mod resolver;
mod session;
mod tracker;

pub use coordinator::*;
pub use debounce::*;
pub use events::*;
pub use mutation::*;
pub use offline::*;
pub use queue::*;
pub use resolver::*;
pub use session::*;
pub use tracker::*;
