//! Mutation events produced by game logic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{PersistError, PersistResult};
use crate::snapshot::StateSnapshot;

/// A batch of changes to a player's inventory.
///
/// Applied atomically: if any spend cannot be covered nothing changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    /// Counter increments (negative to decrement).
    #[serde(default)]
    pub deltas: BTreeMap<String, f64>,
    /// Counter overwrites, applied after deltas.
    #[serde(default)]
    pub sets: BTreeMap<String, f64>,
    /// Amounts spent from accruing resources or counters.
    #[serde(default)]
    pub spends: BTreeMap<String, f64>,
    /// Push to the remote store without waiting for the sync interval.
    #[serde(default)]
    pub critical: bool,
}

impl MutationEvent {
    /// Empty event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to counter `name`.
    pub fn add(mut self, name: &str, delta: f64) -> Self {
        *self.deltas.entry(name.to_string()).or_insert(0.0) += delta;
        self
    }

    /// Overwrite counter `name`.
    pub fn set(mut self, name: &str, value: f64) -> Self {
        self.sets.insert(name.to_string(), value);
        self
    }

    /// Spend `amount` of `name`.
    pub fn spend(mut self, name: &str, amount: f64) -> Self {
        *self.spends.entry(name.to_string()).or_insert(0.0) += amount;
        self
    }

    /// Flag the event as critical.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Whether the event touches any of `resources`.
    pub fn touches(&self, resources: &[String]) -> bool {
        resources.iter().any(|name| {
            self.deltas.contains_key(name)
                || self.sets.contains_key(name)
                || self.spends.contains_key(name)
        })
    }

    /// Whether the event changes nothing.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.sets.is_empty() && self.spends.is_empty()
    }

    /// Apply to `snapshot` at `now_ms`.
    ///
    /// Spends hit an accruing resource of that name first, otherwise a
    /// counter. The integrity hash is cleared; the next save reseals.
    pub fn apply(&self, snapshot: &mut StateSnapshot, now_ms: u64) -> PersistResult<()> {
        let mut inventory = snapshot.inventory.clone();

        for (name, &amount) in &self.spends {
            if !amount.is_finite() || amount < 0.0 {
                return Err(PersistError::InvalidSnapshot(format!(
                    "cannot spend {amount} of {name}"
                )));
            }
            if let Some(resource) = inventory.accruing.get_mut(name) {
                let available = resource.available(now_ms);
                if resource.spend(amount, now_ms).is_none() {
                    return Err(PersistError::InsufficientResource {
                        resource: name.clone(),
                        requested: amount,
                        available,
                    });
                }
            } else if let Some(value) = inventory.counters.get_mut(name) {
                if amount > *value {
                    return Err(PersistError::InsufficientResource {
                        resource: name.clone(),
                        requested: amount,
                        available: *value,
                    });
                }
                *value -= amount;
            } else {
                return Err(PersistError::UnknownResource(name.clone()));
            }
        }
        for (name, &delta) in &self.deltas {
            inventory.add(name, delta);
        }
        for (name, &value) in &self.sets {
            inventory.set(name, value);
        }

        snapshot.inventory = inventory;
        snapshot.integrity_hash = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: u64 = 60_000;

    #[test]
    fn test_apply_counters() {
        let mut s = StateSnapshot::default_for("u1", 0);
        MutationEvent::new()
            .add("coins", 5.0)
            .add("coins", 2.0)
            .set("level", 3.0)
            .apply(&mut s, 0)
            .unwrap();
        assert_eq!(s.inventory.counter("coins"), 7.0);
        assert_eq!(s.inventory.counter("level"), 3.0);
    }

    #[test]
    fn test_spend_energy_materializes_accrual() {
        let mut s = StateSnapshot::default_for("u1", 0);
        s.inventory.accruing.get_mut("energy").unwrap().value = 50.0;

        MutationEvent::new().spend("energy", 20.0).apply(&mut s, 10 * MINUTE).unwrap();
        let energy = &s.inventory.accruing["energy"];
        assert_eq!(energy.value, 40.0);
        assert_eq!(energy.last_update_timestamp, 10 * MINUTE);
    }

    #[test]
    fn test_insufficient_leaves_snapshot_untouched() {
        let mut s = StateSnapshot::default_for("u1", 0);
        s.seal().unwrap();
        let before = s.clone();

        let err = MutationEvent::new()
            .add("coins", 10.0)
            .spend("energy", 500.0)
            .apply(&mut s, 0)
            .unwrap_err();
        assert!(matches!(err, PersistError::InsufficientResource { .. }));
        assert_eq!(s, before);
    }

    #[test]
    fn test_spend_counter_and_unknown() {
        let mut s = StateSnapshot::default_for("u1", 0);
        s.inventory.set("coins", 10.0);
        MutationEvent::new().spend("coins", 4.0).apply(&mut s, 0).unwrap();
        assert_eq!(s.inventory.counter("coins"), 6.0);

        let err = MutationEvent::new().spend("gems", 1.0).apply(&mut s, 0).unwrap_err();
        assert!(matches!(err, PersistError::UnknownResource(name) if name == "gems"));
    }

    #[test]
    fn test_touches() {
        let core = vec!["coins".to_string(), "energy".to_string()];
        assert!(MutationEvent::new().spend("energy", 1.0).touches(&core));
        assert!(!MutationEvent::new().add("xp", 1.0).touches(&core));
        assert!(MutationEvent::new().is_empty());
    }
}
