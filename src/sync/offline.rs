//! Offline accrual of time-based resources.
//!
//! For a resource with rate `r` and capacity `C`:
//!
//! ```text
//! elapsed   = now - last_update_timestamp
//! new_value = min(C, value + elapsed * r)
//! ```
//!
//! The result is only written back when `new_value >= C`, together with
//! `last_update_timestamp = now`. A partially refilled resource keeps its
//! stored value and timestamp (callers read the live amount through
//! [`AccruingResource::available`]), so repeated recomputation never counts
//! the same interval twice.

use tracing::debug;

use crate::core::Clock;
use crate::snapshot::{AccruingResource, StateSnapshot};

/// Recomputes accruing resources for elapsed real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProgressCalculator;

impl OfflineProgressCalculator {
    /// Create a calculator.
    pub fn new() -> Self {
        Self
    }

    /// Apply accrual to every accruing resource of `snapshot` as of `now_ms`.
    ///
    /// Idempotent: `recompute(&recompute(s, t), t) == recompute(s, t)`. A
    /// `now_ms` earlier than a resource's last update leaves it untouched.
    /// When anything changes the stale integrity hash is cleared.
    pub fn recompute(&self, snapshot: &StateSnapshot, now_ms: u64) -> StateSnapshot {
        let mut next = snapshot.clone();
        let mut changed = false;
        for (name, resource) in next.inventory.accruing.iter_mut() {
            if Self::recompute_resource(resource, now_ms) {
                debug!(user_id = %snapshot.user_id, resource = %name, value = resource.value, "resource refilled offline");
                changed = true;
            }
        }
        if changed {
            next.integrity_hash = None;
        }
        next
    }

    /// [`recompute`](Self::recompute) at the clock's current time.
    pub fn recompute_now(&self, snapshot: &StateSnapshot, clock: &dyn Clock) -> StateSnapshot {
        self.recompute(snapshot, clock.now_ms())
    }

    /// Accrue a single resource. Returns whether it was modified.
    pub fn recompute_resource(resource: &mut AccruingResource, now_ms: u64) -> bool {
        if now_ms <= resource.last_update_timestamp {
            return false;
        }
        let new_value = resource.available(now_ms);
        if new_value >= resource.capacity {
            resource.value = resource.capacity;
            resource.last_update_timestamp = now_ms;
            true
        } else {
            false
        }
    }
}
