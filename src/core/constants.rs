//! Engine constants and defaults.
//!
//! Timing values are defaults for [`EngineConfig`](crate::config::EngineConfig);
//! key prefixes and crypto sizes are fixed by the storage format.

use std::time::Duration;

// =============================================================================
// STORAGE KEY LAYOUT
// =============================================================================

/// Prefix of the primary sealed snapshot (`secure:<user_id>`).
pub const PRIMARY_KEY_PREFIX: &str = "secure:";

/// Suffix appended to the primary key for the backup slot.
pub const BACKUP_KEY_SUFFIX: &str = ":backup";

/// Prefix of the per-user sync metadata entry.
pub const METADATA_KEY_PREFIX: &str = "sync-metadata:";

/// Prefix of the per-user emergency entry (emergency store only).
pub const EMERGENCY_KEY_PREFIX: &str = "emergency:";

/// Key prefixes that survive a quota eviction pass.
pub const DEFAULT_CRITICAL_KEY_PREFIXES: &[&str] = &["auth:", "identity:"];

/// Current envelope format written by the secure store.
pub const ENVELOPE_FORMAT: u8 = 1;

// =============================================================================
// CRYPTO
// =============================================================================

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// XChaCha20 nonce size.
pub const AEAD_NONCE_SIZE: usize = 24;

/// Sealing key size.
pub const SEAL_KEY_SIZE: usize = 32;

/// HKDF info label for local envelope keys.
pub const SEAL_KEY_INFO: &[u8] = b"progress-sync v1 local seal";

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// Idle window before a burst of mutations is written.
pub const DEFAULT_DEBOUNCE_IDLE: Duration = Duration::from_millis(500);

/// A remote push is warranted once this long has passed since the last
/// confirmed remote sync.
pub const DEFAULT_REMOTE_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on a single remote RPC.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay for queue retry backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Maximum delay between queue retries.
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

/// Interval of the background sync worker.
pub const DEFAULT_WORKER_INTERVAL: Duration = Duration::from_secs(15);

// =============================================================================
// LIMITS
// =============================================================================

/// Total delivery attempts (first try included) before a queued item is
/// permanently failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Hard cap on queued items.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Largest serialized emergency record accepted.
pub const DEFAULT_EMERGENCY_MAX_BYTES: usize = 16 * 1024;

/// Users holding an emergency entry at once.
pub const DEFAULT_EMERGENCY_MAX_ENTRIES: usize = 4;

// =============================================================================
// DEFAULT INVENTORY
// =============================================================================

/// Plain counter present in every fresh inventory.
pub const RESOURCE_COINS: &str = "coins";

/// Time-accruing resource present in every fresh inventory.
pub const RESOURCE_ENERGY: &str = "energy";

/// Capacity of the default energy resource.
pub const DEFAULT_ENERGY_CAPACITY: f64 = 100.0;

/// Accrual rate of the default energy resource (units per minute).
pub const DEFAULT_ENERGY_RATE_PER_MINUTE: f64 = 1.0;

/// Milliseconds per minute, for accrual arithmetic.
pub const MS_PER_MINUTE: f64 = 60_000.0;
