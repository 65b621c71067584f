//! Outbox of pending remote saves.
//!
//! Items move `Pending -> Processing -> Done | Failed`. A failed item waits
//! `min(max_delay, base_delay * 2^attempt_count)` and then becomes pending
//! again, until `max_attempts` is reached and it stays failed for good.
//!
//! ```text
//!   enqueue ──> Pending ──> Processing ──ok──> Done (dropped after the pass)
//!                  ^             │
//!                  │ backoff     ├─error──> Failed ──attempts left──┘
//!                  │  elapsed    │                  └─exhausted──> Failed (parked)
//!                  └─────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::events::{EventBus, SyncEvent};
use crate::core::{
    Clock, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_CAPACITY, DEFAULT_REMOTE_TIMEOUT,
    DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY, NetworkMonitor, RemoteError, RemoteStore,
};
use crate::snapshot::StateSnapshot;
use crate::storage::EmergencyBackupManager;

/// Queue tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Hard cap on queued items.
    pub capacity: usize,
    /// Total attempts, first included, before an item is parked as
    /// permanently failed.
    pub max_attempts: u32,
    /// First retry delay.
    pub base_delay: Duration,
    /// Retry delay ceiling.
    pub max_delay: Duration,
    /// Deadline for one remote save.
    pub remote_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

/// Lifecycle state of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// Waiting for the next pass.
    Pending,
    /// Remote save in flight.
    Processing,
    /// Last attempt failed.
    Failed,
    /// Delivered.
    Done,
}

/// One pending remote save.
#[derive(Debug, Clone)]
pub struct SyncQueueItem {
    /// Unique, increasing id.
    pub id: u64,
    /// Owner.
    pub user_id: String,
    /// Copy to deliver.
    pub snapshot: StateSnapshot,
    /// Enqueue time (ms).
    pub enqueued_at: u64,
    /// Failed attempts so far.
    pub attempt_count: u32,
    /// Current state.
    pub status: ItemStatus,
    /// Error of the last failed attempt.
    pub last_error: Option<String>,
    /// Earliest time of the next attempt (ms).
    pub next_attempt_at: u64,
}

impl SyncQueueItem {
    /// Snapshot version this item delivers.
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.status == ItemStatus::Failed && self.attempt_count >= max_attempts
    }
}

/// A delivered item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Item id.
    pub item_id: u64,
    /// Owner.
    pub user_id: String,
    /// Version now held by the remote.
    pub version: u64,
    /// Storage type reported by the remote.
    pub storage_type: String,
}

/// An item the remote refused because it holds a newer version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Item id.
    pub item_id: u64,
    /// Owner.
    pub user_id: String,
    /// Version we sent.
    pub sent: u64,
    /// Version the remote holds.
    pub remote: u64,
}

/// An item that ran out of attempts during this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    /// Item id.
    pub item_id: u64,
    /// Owner.
    pub user_id: String,
    /// Version that never reached the remote.
    pub version: u64,
    /// Last error.
    pub error: String,
}

/// Outcome of one [`SyncQueue::process`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// The network was down; nothing was attempted.
    pub skipped_offline: bool,
    /// Ids attempted, in order.
    pub attempted: Vec<u64>,
    /// Successful deliveries.
    pub delivered: Vec<Delivery>,
    /// Ids that failed and will be retried.
    pub retried: Vec<u64>,
    /// Items parked as permanently failed.
    pub exhausted: Vec<Exhausted>,
    /// Version conflicts for the coordinator to reconcile.
    pub conflicts: Vec<Conflict>,
    /// Ids dropped because a newer version for the same user was delivered.
    pub superseded: Vec<u64>,
}

/// Item counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting, including failed items whose backoff has not elapsed.
    pub pending: usize,
    /// In flight.
    pub processing: usize,
    /// Failed with attempts left.
    pub retrying: usize,
    /// Permanently failed.
    pub exhausted: usize,
}

impl QueueStats {
    /// Items still owned by the queue.
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.retrying + self.exhausted
    }
}

/// Mutable part of the queue, behind a short-lived lock.
#[derive(Debug)]
struct QueueState {
    items: Vec<SyncQueueItem>,
    next_id: u64,
}

/// Backoff-scheduled outbox of remote saves.
///
/// Safe to share: `enqueue` and the inspection methods only take a short
/// synchronous lock, and a pass releases it around every remote call, so
/// producers never wait on the network. Passes themselves are serialized.
pub struct SyncQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    pass: tokio::sync::Mutex<()>,
    remote: Arc<dyn RemoteStore>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    emergency: Arc<EmergencyBackupManager>,
    events: EventBus,
}

/// Item picked for an attempt, copied out of the queue.
struct Claimed {
    id: u64,
    user_id: String,
    snapshot: StateSnapshot,
}

impl SyncQueue {
    /// Empty queue delivering to `remote`.
    pub fn new(
        config: QueueConfig,
        remote: Arc<dyn RemoteStore>,
        network: Arc<dyn NetworkMonitor>,
        clock: Arc<dyn Clock>,
        emergency: Arc<EmergencyBackupManager>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState {
                items: Vec::new(),
                next_id: 1,
            }),
            pass: tokio::sync::Mutex::new(()),
            remote,
            network,
            clock,
            emergency,
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue tuning.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Copy of the items in enqueue order.
    pub fn items(&self) -> Vec<SyncQueueItem> {
        self.state().items.clone()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    /// Delay before retry number `attempt_count`.
    pub fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt_count);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Append a copy of `snapshot`. Returns the item id.
    ///
    /// Over capacity, done and permanently failed items go first, then the
    /// oldest retryable ones. An item in flight is never evicted.
    pub fn enqueue(&self, snapshot: &StateSnapshot) -> u64 {
        let now = self.clock.now_ms();
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.items.push(SyncQueueItem {
            id,
            user_id: snapshot.user_id.clone(),
            snapshot: snapshot.clone(),
            enqueued_at: now,
            attempt_count: 0,
            status: ItemStatus::Pending,
            last_error: None,
            next_attempt_at: now,
        });
        debug!(item_id = id, user_id = %snapshot.user_id, version = snapshot.version, "enqueued remote save");

        let capacity = self.config.capacity.max(1);
        while state.items.len() > capacity {
            if !self.evict_one(&mut state.items) {
                break;
            }
        }
        id
    }

    fn evict_one(&self, items: &mut Vec<SyncQueueItem>) -> bool {
        let max_attempts = self.config.max_attempts;
        let index = items
            .iter()
            .position(|item| item.status == ItemStatus::Done || item.is_exhausted(max_attempts))
            .or_else(|| {
                items
                    .iter()
                    .position(|item| item.status != ItemStatus::Processing)
            });
        let Some(index) = index else {
            return false;
        };
        let item = items.remove(index);
        warn!(item_id = item.id, user_id = %item.user_id, version = item.version(), status = ?item.status, "queue full, evicted item");
        true
    }

    /// Run one delivery pass.
    ///
    /// A no-op while offline. Otherwise every item queued before the pass
    /// whose backoff has elapsed is attempted once, in enqueue order, each
    /// under the remote timeout. The item lock is not held during remote
    /// calls; a concurrent pass waits for this one to finish.
    pub async fn process(&self) -> ProcessReport {
        let _pass = self.pass.lock().await;
        let mut report = ProcessReport::default();
        if !self.network.is_online() {
            debug!(queued = self.len(), "offline, queue pass skipped");
            report.skipped_offline = true;
            return report;
        }

        let now = self.clock.now_ms();
        let max_attempts = self.config.max_attempts;
        let last_id = {
            let mut state = self.state();
            for item in &mut state.items {
                if item.status == ItemStatus::Failed
                    && item.attempt_count < max_attempts
                    && item.next_attempt_at <= now
                {
                    item.status = ItemStatus::Pending;
                }
            }
            state.next_id.saturating_sub(1)
        };

        let mut cursor = 0;
        loop {
            if !self.network.is_online() {
                info!("network lost during queue pass");
                break;
            }
            let Some(claimed) = self.claim_next(cursor, last_id, now) else {
                break;
            };
            cursor = claimed.id;
            report.attempted.push(claimed.id);
            self.attempt(claimed, &mut report).await;
        }

        self.state().items.retain(|item| item.status != ItemStatus::Done);
        report
    }

    /// Mark the next due item after `cursor` as in flight and copy it out.
    fn claim_next(&self, cursor: u64, last_id: u64, now: u64) -> Option<Claimed> {
        let mut state = self.state();
        let item = state.items.iter_mut().find(|item| {
            item.id > cursor
                && item.id <= last_id
                && item.status == ItemStatus::Pending
                && item.next_attempt_at <= now
        })?;
        item.status = ItemStatus::Processing;
        Some(Claimed {
            id: item.id,
            user_id: item.user_id.clone(),
            snapshot: item.snapshot.clone(),
        })
    }

    async fn attempt(&self, claimed: Claimed, report: &mut ProcessReport) {
        let timeout = self.config.remote_timeout;
        let Claimed {
            id,
            user_id,
            snapshot,
        } = claimed;
        let version = snapshot.version;

        let result = match tokio::time::timeout(
            timeout,
            self.remote.save(&user_id, &snapshot, version),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };

        let mut state = self.state();
        let position = state.items.iter().position(|item| item.id == id);

        match result {
            Ok(ack) => {
                if let Some(index) = position {
                    state.items[index].status = ItemStatus::Done;
                    state.items[index].last_error = None;
                }
                info!(item_id = id, user_id = %user_id, version, storage = %ack.storage_type, "remote save delivered");
                let delivery = Delivery {
                    item_id: id,
                    user_id,
                    version,
                    storage_type: ack.storage_type,
                };
                Self::supersede(&mut state.items, &delivery, report);
                drop(state);
                self.events.emit(SyncEvent::StateSaved {
                    user_id: delivery.user_id.clone(),
                    storage_type: delivery.storage_type.clone(),
                });
                report.delivered.push(delivery);
            }
            Err(RemoteError::VersionConflict { sent, remote }) => {
                if let Some(index) = position {
                    state.items[index].status = ItemStatus::Done;
                }
                warn!(item_id = id, user_id = %user_id, sent, remote, "remote holds a newer version");
                report.conflicts.push(Conflict {
                    item_id: id,
                    user_id,
                    sent,
                    remote,
                });
            }
            Err(err) => {
                let Some(index) = position else {
                    debug!(item_id = id, error = %err, "failed item was evicted during its attempt");
                    return;
                };
                let now = self.clock.now_ms();
                let item = &mut state.items[index];
                item.attempt_count += 1;
                item.status = ItemStatus::Failed;
                item.last_error = Some(err.to_string());
                let attempts = item.attempt_count;

                if attempts >= self.config.max_attempts {
                    drop(state);
                    error!(item_id = id, user_id = %user_id, version, attempt = attempts, error = %err, "remote save exhausted retries");
                    if let Err(e) = self.emergency.ensure(&snapshot, now) {
                        error!(user_id = %user_id, error = %e, "emergency capture failed");
                    }
                    let exhausted = Exhausted {
                        item_id: id,
                        user_id,
                        version,
                        error: err.to_string(),
                    };
                    self.events.emit(SyncEvent::StateSaveError {
                        user_id: exhausted.user_id.clone(),
                        error: exhausted.error.clone(),
                    });
                    report.exhausted.push(exhausted);
                } else {
                    let delay = self.backoff_delay(attempts);
                    item.next_attempt_at = now.saturating_add(delay.as_millis() as u64);
                    debug!(item_id = id, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %err, "remote save failed, will retry");
                    report.retried.push(id);
                }
            }
        }
    }

    /// Mark queued copies older than a delivered version as done.
    fn supersede(items: &mut [SyncQueueItem], delivery: &Delivery, report: &mut ProcessReport) {
        for item in items {
            if item.user_id == delivery.user_id
                && item.version() < delivery.version
                && matches!(item.status, ItemStatus::Pending | ItemStatus::Failed)
            {
                item.status = ItemStatus::Done;
                debug!(item_id = item.id, version = item.version(), "superseded by newer delivery");
                report.superseded.push(item.id);
            }
        }
    }

    /// Put permanently failed items back in line with a fresh attempt count.
    pub fn retry_exhausted(&self) -> usize {
        let max_attempts = self.config.max_attempts;
        let now = self.clock.now_ms();
        let mut revived = 0;
        for item in &mut self.state().items {
            if item.is_exhausted(max_attempts) {
                item.status = ItemStatus::Pending;
                item.attempt_count = 0;
                item.next_attempt_at = now;
                revived += 1;
            }
        }
        if revived > 0 {
            info!(count = revived, "manual retry of failed saves");
        }
        revived
    }

    /// Item counts by state.
    pub fn stats(&self) -> QueueStats {
        let max_attempts = self.config.max_attempts;
        let mut stats = QueueStats::default();
        for item in &self.state().items {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Processing => stats.processing += 1,
                ItemStatus::Failed if item.is_exhausted(max_attempts) => stats.exhausted += 1,
                ItemStatus::Failed => stats.retrying += 1,
                ItemStatus::Done => {}
            }
        }
        stats
    }

    /// Whether an item for `user_id` at `version` or newer is still queued.
    pub fn has_pending(&self, user_id: &str, version: u64) -> bool {
        let max_attempts = self.config.max_attempts;
        self.state().items.iter().any(|item| {
            item.user_id == user_id
                && item.version() >= version
                && item.status != ItemStatus::Done
                && !item.is_exhausted(max_attempts)
        })
    }
}
