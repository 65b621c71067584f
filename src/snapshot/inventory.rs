//! Player inventory: plain counters and capacity-bounded accruing resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{
    DEFAULT_ENERGY_CAPACITY, DEFAULT_ENERGY_RATE_PER_MINUTE, MS_PER_MINUTE, RESOURCE_COINS,
    RESOURCE_ENERGY,
};

/// A resource that regenerates linearly up to a capacity.
///
/// `value` is the amount held at `last_update_timestamp`. The amount held at
/// any later instant is derived with [`available`](Self::available); it is
/// only written back when the resource refills completely or is spent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccruingResource {
    /// Amount held at `last_update_timestamp`.
    pub value: f64,
    /// Upper bound.
    pub capacity: f64,
    /// Units gained per minute of elapsed time.
    pub rate_per_minute: f64,
    /// Milliseconds since the Unix epoch.
    pub last_update_timestamp: u64,
}

impl AccruingResource {
    /// Create a resource holding `value` at `now_ms`.
    pub fn new(value: f64, capacity: f64, rate_per_minute: f64, now_ms: u64) -> Self {
        Self {
            value,
            capacity,
            rate_per_minute,
            last_update_timestamp: now_ms,
        }
    }

    /// Amount held at `now_ms`, capped at capacity.
    ///
    /// A `now_ms` before the last update yields the stored value.
    pub fn available(&self, now_ms: u64) -> f64 {
        let elapsed_ms = now_ms.saturating_sub(self.last_update_timestamp);
        let gained = elapsed_ms as f64 / MS_PER_MINUTE * self.rate_per_minute;
        (self.value + gained).min(self.capacity)
    }

    /// Whether the stored value has reached capacity.
    pub fn is_full(&self) -> bool {
        self.value >= self.capacity
    }

    /// Spend `amount` at `now_ms`, materializing accrual up to that instant.
    ///
    /// Returns the remaining amount, or `None` (leaving the resource untouched)
    /// if not enough is available.
    pub fn spend(&mut self, amount: f64, now_ms: u64) -> Option<f64> {
        let available = self.available(now_ms);
        if amount > available {
            return None;
        }
        self.value = available - amount;
        self.last_update_timestamp = self.last_update_timestamp.max(now_ms);
        Some(self.value)
    }

    fn problems(&self, name: &str, out: &mut Vec<String>) {
        if !self.value.is_finite() || self.value < 0.0 {
            out.push(format!("{name}.value is not a finite non-negative number"));
        }
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            out.push(format!("{name}.capacity is not a finite positive number"));
        }
        if !self.rate_per_minute.is_finite() || self.rate_per_minute < 0.0 {
            out.push(format!("{name}.ratePerMinute is not a finite non-negative number"));
        }
    }

    fn repair(&mut self) -> bool {
        let mut changed = false;
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            self.capacity = DEFAULT_ENERGY_CAPACITY;
            changed = true;
        }
        if !self.rate_per_minute.is_finite() || self.rate_per_minute < 0.0 {
            self.rate_per_minute = 0.0;
            changed = true;
        }
        if !self.value.is_finite() || self.value < 0.0 {
            self.value = 0.0;
            changed = true;
        }
        if self.value > self.capacity {
            self.value = self.capacity;
            changed = true;
        }
        changed
    }
}

/// Named numeric resources owned by a player.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    /// Plain counters.
    #[serde(default)]
    pub counters: BTreeMap<String, f64>,
    /// Time-accruing, capacity-bounded resources.
    #[serde(default)]
    pub accruing: BTreeMap<String, AccruingResource>,
}

impl Inventory {
    /// Starting inventory for a new player.
    pub fn starting(now_ms: u64) -> Self {
        let mut inventory = Self::default();
        inventory.counters.insert(RESOURCE_COINS.to_string(), 0.0);
        inventory.accruing.insert(
            RESOURCE_ENERGY.to_string(),
            AccruingResource::new(
                DEFAULT_ENERGY_CAPACITY,
                DEFAULT_ENERGY_CAPACITY,
                DEFAULT_ENERGY_RATE_PER_MINUTE,
                now_ms,
            ),
        );
        inventory
    }

    /// Counter value, zero if absent.
    pub fn counter(&self, name: &str) -> f64 {
        self.counters.get(name).copied().unwrap_or(0.0)
    }

    /// Add `delta` to a counter, creating it at zero.
    pub fn add(&mut self, name: &str, delta: f64) -> f64 {
        let slot = self.counters.entry(name.to_string()).or_insert(0.0);
        *slot += delta;
        *slot
    }

    /// Overwrite a counter.
    pub fn set(&mut self, name: &str, value: f64) {
        self.counters.insert(name.to_string(), value);
    }

    /// Structural problems, empty when valid.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, value) in &self.counters {
            if !value.is_finite() {
                out.push(format!("{name} is not a finite number"));
            }
        }
        for (name, resource) in &self.accruing {
            resource.problems(name, &mut out);
        }
        out
    }

    /// Coerce invalid numbers to safe defaults. Returns whether anything changed.
    pub fn repair(&mut self) -> bool {
        let mut changed = false;
        for value in self.counters.values_mut() {
            if !value.is_finite() {
                *value = 0.0;
                changed = true;
            }
        }
        for resource in self.accruing.values_mut() {
            changed |= resource.repair();
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(value: f64, at: u64) -> AccruingResource {
        AccruingResource::new(value, 100.0, 1.0, at)
    }

    #[test]
    fn test_available_accrues_linearly() {
        let res = energy(50.0, 0);
        assert_eq!(res.available(0), 50.0);
        assert_eq!(res.available(10 * 60_000), 60.0);
    }

    #[test]
    fn test_available_caps_at_capacity() {
        let res = energy(90.0, 0);
        assert_eq!(res.available(60 * 60_000), 100.0);
    }

    #[test]
    fn test_available_before_last_update() {
        let res = energy(40.0, 1_000_000);
        assert_eq!(res.available(0), 40.0);
    }

    #[test]
    fn test_spend_materializes_accrual() {
        let mut res = energy(10.0, 0);
        let left = res.spend(15.0, 10 * 60_000).unwrap();
        assert_eq!(left, 5.0);
        assert_eq!(res.last_update_timestamp, 10 * 60_000);
    }

    #[test]
    fn test_spend_insufficient_leaves_resource() {
        let mut res = energy(10.0, 0);
        assert!(res.spend(11.0, 0).is_none());
        assert_eq!(res, energy(10.0, 0));
    }

    #[test]
    fn test_problems_and_repair() {
        let mut inv = Inventory::starting(0);
        inv.set("coins", f64::NAN);
        inv.accruing.get_mut("energy").unwrap().capacity = f64::INFINITY;

        assert_eq!(inv.problems().len(), 2);
        assert!(inv.repair());
        assert!(inv.problems().is_empty());
        assert_eq!(inv.counter("coins"), 0.0);
        assert_eq!(inv.accruing["energy"].capacity, DEFAULT_ENERGY_CAPACITY);
        assert!(!inv.repair());
    }

    #[test]
    fn test_add_creates_counter() {
        let mut inv = Inventory::default();
        assert_eq!(inv.add("gems", 3.0), 3.0);
        assert_eq!(inv.add("gems", -1.0), 2.0);
        assert_eq!(inv.counter("missing"), 0.0);
    }
}
