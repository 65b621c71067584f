//! Engine configuration.
//!
//! Durations are (de)serialized as integer milliseconds so a config can be
//! loaded from JSON:
//!
//! ```json
//! { "debounceIdleMs": 250, "maxAttempts": 8, "coreResources": ["coins", "energy"] }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    DEFAULT_CRITICAL_KEY_PREFIXES, DEFAULT_DEBOUNCE_IDLE, DEFAULT_EMERGENCY_MAX_BYTES,
    DEFAULT_EMERGENCY_MAX_ENTRIES, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_REMOTE_SYNC_INTERVAL, DEFAULT_REMOTE_TIMEOUT, DEFAULT_RETRY_BASE_DELAY,
    DEFAULT_RETRY_MAX_DELAY, DEFAULT_WORKER_INTERVAL, PersistError, PersistResult, RESOURCE_COINS,
    RESOURCE_ENERGY,
};
use crate::sync::QueueConfig;

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Tuning for a [`SyncCoordinator`](crate::sync::SyncCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Quiet period before a burst of mutations is written.
    #[serde(rename = "debounceIdleMs", with = "duration_ms")]
    pub debounce_idle: Duration,

    /// Time since the last confirmed remote sync after which a save is also
    /// pushed to the remote.
    #[serde(rename = "remoteSyncIntervalMs", with = "duration_ms")]
    pub remote_sync_interval: Duration,

    /// Deadline for one remote call.
    #[serde(rename = "remoteTimeoutMs", with = "duration_ms")]
    pub remote_timeout: Duration,

    /// First queue retry delay.
    #[serde(rename = "retryBaseDelayMs", with = "duration_ms")]
    pub retry_base_delay: Duration,

    /// Queue retry delay ceiling.
    #[serde(rename = "retryMaxDelayMs", with = "duration_ms")]
    pub retry_max_delay: Duration,

    /// Period of the background sync worker.
    #[serde(rename = "workerIntervalMs", with = "duration_ms")]
    pub worker_interval: Duration,

    /// Total delivery attempts per remote save, the first one included.
    /// The item is parked as permanently failed once its failed attempt
    /// count reaches this value.
    pub max_attempts: u32,

    /// Hard cap on queued remote saves.
    pub queue_capacity: usize,

    /// Resources whose mutation triggers an emergency capture.
    pub core_resources: Vec<String>,

    /// Local keys that survive quota eviction.
    pub critical_key_prefixes: Vec<String>,

    /// Largest emergency capture accepted.
    pub emergency_max_bytes: usize,

    /// Users holding an emergency capture at once.
    pub emergency_max_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_idle: DEFAULT_DEBOUNCE_IDLE,
            remote_sync_interval: DEFAULT_REMOTE_SYNC_INTERVAL,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            worker_interval: DEFAULT_WORKER_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            core_resources: vec![RESOURCE_COINS.to_string(), RESOURCE_ENERGY.to_string()],
            critical_key_prefixes: DEFAULT_CRITICAL_KEY_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            emergency_max_bytes: DEFAULT_EMERGENCY_MAX_BYTES,
            emergency_max_entries: DEFAULT_EMERGENCY_MAX_ENTRIES,
        }
    }
}

impl EngineConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> PersistResult<()> {
        let zero_durations = [
            ("remoteTimeout", self.remote_timeout),
            ("retryBaseDelay", self.retry_base_delay),
            ("retryMaxDelay", self.retry_max_delay),
            ("workerInterval", self.worker_interval),
        ];
        if let Some((name, _)) = zero_durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(PersistError::Config(format!("{name} must be non-zero")));
        }
        if self.retry_max_delay < self.retry_base_delay {
            return Err(PersistError::Config(
                "retryMaxDelay must not be below retryBaseDelay".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(PersistError::Config("maxAttempts must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PersistError::Config("queueCapacity must be at least 1".into()));
        }
        if self.emergency_max_entries == 0 || self.emergency_max_bytes == 0 {
            return Err(PersistError::Config("emergency limits must be non-zero".into()));
        }
        Ok(())
    }

    /// The queue part of the configuration.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            max_attempts: self.max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            remote_timeout: self.remote_timeout,
        }
    }
}

/// Fluent builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Builder seeded with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce idle window.
    pub fn debounce_idle(mut self, idle: Duration) -> Self {
        self.config.debounce_idle = idle;
        self
    }

    /// Set the needs-sync interval.
    pub fn remote_sync_interval(mut self, interval: Duration) -> Self {
        self.config.remote_sync_interval = interval;
        self
    }

    /// Set the remote call deadline.
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.config.remote_timeout = timeout;
        self
    }

    /// Set the retry backoff bounds.
    pub fn retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.config.retry_base_delay = base;
        self.config.retry_max_delay = max;
        self
    }

    /// Set the background worker period.
    pub fn worker_interval(mut self, interval: Duration) -> Self {
        self.config.worker_interval = interval;
        self
    }

    /// Set the total number of delivery attempts per remote save.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the queue cap.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Replace the core resource list.
    pub fn core_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.core_resources = resources.into_iter().map(Into::into).collect();
        self
    }

    /// Add a key prefix that survives quota eviction.
    pub fn critical_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.critical_key_prefixes.push(prefix.into());
        self
    }

    /// Set the emergency store limits.
    pub fn emergency_limits(mut self, max_bytes: usize, max_entries: usize) -> Self {
        self.config.emergency_max_bytes = max_bytes;
        self.config.emergency_max_entries = max_entries;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> PersistResult<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
