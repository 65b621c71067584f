//! Sync coordinator
//!
//! Orchestrates the tiers behind a `save`/`load` contract:
//!
//! ```text
//! save(event) -> apply to canonical -> debounce -> SecureLocalStore::save
//!                                                    -> SyncQueue::enqueue (if due)
//! load(user)  -> local + remote (parallel) -> ConflictResolver
//!                                          -> OfflineProgressCalculator -> canonical
//! ```
//!
//! Enqueueing never waits on the network: the queue only holds its item lock
//! for short synchronous sections and releases it around remote calls. A
//! queue pass takes the session only after it finished, to apply its results.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::debounce::Debouncer;
use super::events::{EventBus, SyncEvent};
use super::mutation::MutationEvent;
use super::offline::OfflineProgressCalculator;
use super::queue::{Conflict, ProcessReport, QueueStats, SyncQueue};
use super::resolver::{ConflictResolver, Winner};
use super::session::SessionContext;
use super::tracker::VersionTracker;
use crate::config::EngineConfig;
use crate::core::{
    Clock, KeyValueStore, NetworkMonitor, PersistError, PersistResult, RemoteError, RemoteStore,
};
use crate::crypto::{DeviceSecret, PayloadCipher};
use crate::snapshot::{SourceTag, StateSnapshot};
use crate::storage::{EmergencyBackupManager, SecureLocalStore, SyncMetadata};

/// External collaborators of a coordinator.
#[derive(Clone)]
pub struct Collaborators {
    /// Local tier.
    pub local: Arc<SecureLocalStore>,
    /// Remote tier.
    pub remote: Arc<dyn RemoteStore>,
    /// Connectivity signal.
    pub network: Arc<dyn NetworkMonitor>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Build the local tier from raw stores and a device secret.
    ///
    /// `emergency_store` should be independent of `store` (typically
    /// session-scoped).
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn KeyValueStore>,
        emergency_store: Arc<dyn KeyValueStore>,
        secret: DeviceSecret,
        remote: Arc<dyn RemoteStore>,
        network: Arc<dyn NetworkMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let emergency = Arc::new(EmergencyBackupManager::new(
            emergency_store,
            config.emergency_max_bytes,
            config.emergency_max_entries,
        ));
        let local = Arc::new(SecureLocalStore::new(
            store,
            PayloadCipher::new(secret),
            emergency,
            config.critical_key_prefixes.clone(),
        ));
        Self {
            local,
            remote,
            network,
            clock,
        }
    }
}

struct Inner {
    config: EngineConfig,
    local: Arc<SecureLocalStore>,
    remote: Arc<dyn RemoteStore>,
    network: Arc<dyn NetworkMonitor>,
    clock: Arc<dyn Clock>,
    emergency: Arc<EmergencyBackupManager>,
    resolver: ConflictResolver,
    offline: OfflineProgressCalculator,
    events: EventBus,
    queue: SyncQueue,
    session: tokio::sync::Mutex<Option<SessionContext>>,
    debouncer: Mutex<Debouncer>,
}

/// Owner of the canonical snapshot for the active session.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

/// Handle to the background worker started by
/// [`SyncCoordinator::spawn_sync_worker`].
#[derive(Debug)]
pub struct SyncWorkerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncWorkerHandle {
    /// Ask the worker to stop after its current pass.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop the worker and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "sync worker ended abnormally");
        }
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl SyncCoordinator {
    /// Create a coordinator. Fails if `config` is invalid.
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> PersistResult<Self> {
        config.validate()?;
        let Collaborators {
            local,
            remote,
            network,
            clock,
        } = collaborators;

        let emergency = Arc::clone(local.emergency());
        let events = EventBus::new();
        let queue = SyncQueue::new(
            config.queue_config(),
            Arc::clone(&remote),
            Arc::clone(&network),
            Arc::clone(&clock),
            Arc::clone(&emergency),
            events.clone(),
        );
        let debouncer = Debouncer::new(config.debounce_idle);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                local,
                remote,
                network,
                clock,
                emergency,
                resolver: ConflictResolver::new(),
                offline: OfflineProgressCalculator::new(),
                events,
                queue,
                session: tokio::sync::Mutex::new(None),
                debouncer: Mutex::new(debouncer),
            }),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn debouncer(&self) -> MutexGuard<'_, Debouncer> {
        self.inner.debouncer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive [`SyncEvent`]s.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Start a session for `user_id`.
    ///
    /// A session for another user is flushed and closed first. The canonical
    /// snapshot is a default placeholder until [`load`](Self::load) runs.
    pub async fn login(&self, user_id: &str) -> PersistResult<()> {
        let mut session = self.inner.session.lock().await;
        self.switch_user(&mut session, user_id).await
    }

    async fn switch_user(
        &self,
        session: &mut Option<SessionContext>,
        user_id: &str,
    ) -> PersistResult<()> {
        if session.as_ref().is_some_and(|s| s.user_id == user_id) {
            return Ok(());
        }
        let mut flush_result = Ok(());
        if let Some(previous) = session.as_mut() {
            self.debouncer().cancel();
            if previous.dirty {
                flush_result = self.persist_session(previous).await;
            }
            info!(user_id = %previous.user_id, "session closed");
        }

        let mut next = SessionContext::new(user_id, self.inner.clock.now_ms());
        next.metadata = self.read_metadata(user_id).await;
        next.tracker = VersionTracker::with_initial_version(next.metadata.save_version);
        next.tracker.record_remote_ack(next.metadata.remote_confirmed_version);
        *session = Some(next);
        info!(user_id, "session started");
        flush_result
    }

    /// Flush pending changes and end the session.
    ///
    /// The session is dropped even if the final flush fails; the unsaved
    /// state is then covered by its emergency capture.
    pub async fn logout(&self) -> PersistResult<()> {
        let mut session = self.inner.session.lock().await;
        self.debouncer().cancel();
        let Some(mut current) = session.take() else {
            return Ok(());
        };
        let result = if current.dirty {
            self.persist_session(&mut current).await
        } else {
            Ok(())
        };
        info!(user_id = %current.user_id, "logged out");
        result
    }

    /// User of the active session.
    pub async fn session_user(&self) -> Option<String> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.user_id.clone())
    }

    /// Copy of the canonical snapshot.
    pub async fn canonical(&self) -> Option<StateSnapshot> {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.canonical.clone())
    }

    /// Load the canonical snapshot for `user_id`, starting a session if needed.
    ///
    /// Local and remote are read in parallel, resolved, and brought up to date
    /// for offline accrual. Never fails: with no usable source a default
    /// snapshot is returned, except that a canonical obtained by an earlier
    /// load stays in place.
    pub async fn load(&self, user_id: &str) -> StateSnapshot {
        let mut guard = self.inner.session.lock().await;
        if let Err(e) = self.switch_user(&mut guard, user_id).await {
            warn!(user_id, error = %e, "flush of previous session failed");
        }
        let Some(session) = guard.as_mut() else {
            return StateSnapshot::default_for(user_id, self.inner.clock.now_ms());
        };
        if session.dirty {
            self.debouncer().cancel();
            if let Err(e) = self.persist_session(session).await {
                warn!(user_id, error = %e, "pending save failed before load");
            }
        }

        let (local, remote) = tokio::join!(self.load_local(user_id), self.load_remote(user_id));
        let remote = match remote {
            Ok(remote) => remote,
            Err(e) => {
                warn!(user_id, error = %e, "remote load failed");
                None
            }
        };

        let now = self.inner.clock.now_ms();
        let decision = self
            .inner
            .resolver
            .compare(user_id, local.as_ref(), remote.as_ref(), now);

        if decision.winner == Winner::Default && session.loaded {
            warn!(user_id, "no valid source, keeping current canonical");
            return session.canonical.clone();
        }

        let mut canonical = self.inner.offline.recompute(&decision.canonical, now);
        let remote_version = match &remote {
            Some(r) if decision.remote_present => r.version,
            _ => 0,
        };

        if decision.should_cache_remote() {
            match self.inner.local.save(user_id, &canonical).await {
                Ok(stored) => {
                    session.metadata.record_local_save(stored.version, stored.last_saved_at);
                    canonical = stored.with_source(SourceTag::Remote);
                    debug!(user_id, version = canonical.version, "remote snapshot cached locally");
                }
                Err(e) => warn!(user_id, error = %e, "caching remote snapshot failed"),
            }
            session.metadata.record_remote_sync(remote_version, now);
            if let Err(e) = self.inner.local.set_metadata(user_id, &session.metadata).await {
                warn!(user_id, error = %e, "metadata write failed");
            }
        }

        let mut tracker = VersionTracker::with_initial_version(
            canonical.version.max(session.metadata.save_version),
        );
        tracker.record_remote_ack(session.metadata.remote_confirmed_version.max(remote_version));

        let unconfirmed = decision.use_local
            && !decision.remote_present
            && decision.canonical.version > 0
            && session.metadata.remote_confirmed_version < decision.canonical.version;
        if decision.should_push_local() || unconfirmed {
            let queue = &self.inner.queue;
            if !queue.has_pending(user_id, decision.canonical.version) {
                queue.enqueue(&decision.canonical);
                info!(user_id, version = decision.canonical.version, remote_version, "scheduled remote push of local snapshot");
            }
            tracker.record_enqueued(decision.canonical.version);
        }

        session.canonical = canonical.clone();
        session.tracker = tracker;
        session.dirty = false;
        session.loaded = true;
        info!(user_id, winner = ?decision.winner, version = canonical.version, "canonical snapshot loaded");
        canonical
    }

    async fn load_local(&self, user_id: &str) -> Option<StateSnapshot> {
        let local = &self.inner.local;
        let primary = match local.load(user_id).await {
            Ok(Some(snapshot)) if !snapshot.integrity_failed => return Some(snapshot),
            Ok(flagged) => flagged,
            Err(e) => {
                warn!(user_id, error = %e, "local load failed");
                None
            }
        };
        match local.recover_from_backup(user_id).await {
            Ok(Some(recovered)) => Some(recovered),
            Ok(None) => primary,
            Err(e) => {
                warn!(user_id, error = %e, "local recovery failed");
                primary
            }
        }
    }

    async fn load_remote(&self, user_id: &str) -> PersistResult<Option<StateSnapshot>> {
        if !self.inner.network.is_online() {
            return Err(PersistError::NetworkUnavailable);
        }
        let timeout = self.inner.config.remote_timeout;
        match tokio::time::timeout(timeout, self.inner.remote.load(user_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RemoteError::Timeout(timeout).into()),
        }
    }

    async fn read_metadata(&self, user_id: &str) -> SyncMetadata {
        self.inner
            .local
            .metadata(user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(user_id, error = %e, "sync metadata unreadable");
                SyncMetadata::default()
            })
    }

    /// Apply a mutation to the canonical snapshot and schedule a save.
    ///
    /// A session that was only logged in is loaded first, so the mutation
    /// never lands on the default placeholder. Mutations touching a core
    /// resource are captured to the emergency store right away. The local
    /// write follows after the debounce idle window; a newer mutation
    /// restarts the window.
    pub async fn save(&self, event: MutationEvent) -> PersistResult<()> {
        let unloaded = {
            let guard = self.inner.session.lock().await;
            let session = guard.as_ref().ok_or(PersistError::NoSession)?;
            (!session.loaded).then(|| session.user_id.clone())
        };
        if let Some(user_id) = unloaded {
            debug!(user_id = %user_id, "mutation before load, loading first");
            self.load(&user_id).await;
        }

        {
            let mut guard = self.inner.session.lock().await;
            let session = guard.as_mut().ok_or(PersistError::NoSession)?;
            if !session.loaded {
                return Err(PersistError::NotLoaded(session.user_id.clone()));
            }
            let now = self.inner.clock.now_ms();

            event.apply(&mut session.canonical, now)?;
            session.dirty = true;
            if event.critical {
                session.pending_critical = true;
            }
            if event.touches(&self.inner.config.core_resources)
                && let Err(e) = self.inner.emergency.capture(&session.canonical, now)
            {
                warn!(user_id = %session.user_id, error = %e, "emergency capture failed");
            }
        }

        let ticket = self.debouncer().schedule();
        let this = self.clone();
        tokio::spawn(async move {
            if !ticket.wait().await {
                return;
            }
            let fired = this.debouncer().complete(ticket.generation());
            if !fired {
                return;
            }
            if let Err(e) = this.persist_now().await {
                debug!(error = %e, "debounced save failed");
            }
        });
        Ok(())
    }

    /// Cancel the pending debounce and write immediately.
    ///
    /// Returns whether anything was written.
    pub async fn flush(&self) -> PersistResult<bool> {
        self.debouncer().cancel();
        let mut guard = self.inner.session.lock().await;
        match guard.as_mut() {
            Some(session) if session.dirty => {
                self.persist_session(session).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn persist_now(&self) -> PersistResult<()> {
        let mut guard = self.inner.session.lock().await;
        match guard.as_mut() {
            Some(session) if session.dirty => self.persist_session(session).await,
            _ => Ok(()),
        }
    }

    /// Write the canonical snapshot at the next version and enqueue a remote
    /// push when one is due.
    async fn persist_session(&self, session: &mut SessionContext) -> PersistResult<()> {
        let user_id = session.user_id.clone();
        if !session.loaded {
            warn!(user_id = %user_id, "refusing to write a session that was never loaded");
            return Err(PersistError::NotLoaded(user_id));
        }
        let now = self.inner.clock.now_ms();
        let mut candidate = session.canonical.clone();
        candidate.version = session.tracker.next_version();
        candidate.last_saved_at = now;

        let stored = match self.inner.local.save(&user_id, &candidate).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(user_id = %user_id, version = candidate.version, error = %e, "local save failed");
                if let Err(capture) = self.inner.emergency.ensure(&candidate, now) {
                    error!(user_id = %user_id, error = %capture, "emergency capture failed");
                }
                self.inner.events.emit(SyncEvent::StateSaveError {
                    user_id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        session.tracker.commit_save(stored.version);
        session.metadata.record_local_save(stored.version, now);
        session.canonical = stored.clone();
        session.dirty = false;
        self.inner.events.emit(SyncEvent::StateSaved {
            user_id: user_id.clone(),
            storage_type: "local".to_string(),
        });
        debug!(user_id = %user_id, version = stored.version, "state saved locally");

        let interval = self.inner.config.remote_sync_interval.as_millis() as u64;
        if session.needs_remote_sync(now, interval) {
            self.inner.queue.enqueue(&stored);
            session.tracker.record_enqueued(stored.version);
            session.pending_critical = false;
        }
        Ok(())
    }

    /// Run one queue pass and apply its results to the session.
    pub async fn process_queue(&self) -> PersistResult<ProcessReport> {
        self.enqueue_if_due().await;
        let report = self.inner.queue.process().await;
        if !report.skipped_offline {
            self.apply_report(&report).await?;
        }
        Ok(report)
    }

    /// Enqueue the canonical snapshot if it was saved but never queued and
    /// the sync interval has passed since.
    async fn enqueue_if_due(&self) {
        let mut guard = self.inner.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return;
        };
        let now = self.inner.clock.now_ms();
        let interval = self.inner.config.remote_sync_interval.as_millis() as u64;
        if session.dirty
            || session.canonical.integrity_hash.is_none()
            || !session.tracker.has_unqueued_save()
            || !session.needs_remote_sync(now, interval)
        {
            return;
        }
        let version = session.canonical.version;
        self.inner.queue.enqueue(&session.canonical);
        session.tracker.record_enqueued(version);
        debug!(user_id = %session.user_id, version, "sync interval elapsed, enqueued");
    }

    async fn apply_report(&self, report: &ProcessReport) -> PersistResult<()> {
        let unsettled: Vec<&Conflict> = {
            let mut guard = self.inner.session.lock().await;
            let now = self.inner.clock.now_ms();

            for delivery in &report.delivered {
                match guard.as_mut() {
                    Some(session) if session.user_id == delivery.user_id => {
                        if !session.tracker.record_remote_ack(delivery.version) {
                            debug!(user_id = %delivery.user_id, version = delivery.version, current = session.tracker.current_version(), "ack for an older version");
                        }
                        session.metadata.record_remote_sync(delivery.version, now);
                        self.inner
                            .local
                            .set_metadata(&delivery.user_id, &session.metadata)
                            .await?;
                    }
                    _ => {
                        let mut metadata = self.read_metadata(&delivery.user_id).await;
                        metadata.record_remote_sync(delivery.version, now);
                        self.inner
                            .local
                            .set_metadata(&delivery.user_id, &metadata)
                            .await?;
                    }
                }
            }

            report
                .conflicts
                .iter()
                .filter(|conflict| match guard.as_ref() {
                    Some(session) if session.user_id == conflict.user_id => {
                        let settled = session.tracker.remote_confirmed_version() >= conflict.remote;
                        if settled {
                            debug!(user_id = %conflict.user_id, remote = conflict.remote, "conflict settled by a newer delivery");
                        }
                        !settled
                    }
                    _ => {
                        debug!(user_id = %conflict.user_id, "conflict for inactive user left to its next load");
                        false
                    }
                })
                .collect()
        };

        // Remote calls run without the session lock.
        for conflict in unsettled {
            let remote = match self.load_remote(&conflict.user_id).await {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(user_id = %conflict.user_id, error = %e, "remote load for reconcile failed, next load resolves");
                    continue;
                }
            };
            let replaced = {
                let mut guard = self.inner.session.lock().await;
                let Some(session) = guard
                    .as_mut()
                    .filter(|session| session.user_id == conflict.user_id)
                else {
                    continue;
                };
                match self.reconcile(session, conflict, remote).await {
                    Ok(replaced) => replaced,
                    Err(e) => {
                        warn!(user_id = %conflict.user_id, error = %e, "reconcile failed, next load resolves");
                        None
                    }
                }
            };
            if let Some(local) = replaced
                && let Err(e) = self
                    .inner
                    .remote
                    .backup(&conflict.user_id, &local, local.version)
                    .await
            {
                warn!(user_id = %conflict.user_id, error = %e, "remote backup of local copy failed");
            }
        }
        Ok(())
    }

    /// Settle a version conflict with the remote through the resolver.
    ///
    /// Returns the local copy the remote replaced, for a remote backup.
    async fn reconcile(
        &self,
        session: &mut SessionContext,
        conflict: &Conflict,
        remote: Option<StateSnapshot>,
    ) -> PersistResult<Option<StateSnapshot>> {
        let user_id = session.user_id.clone();
        let now = self.inner.clock.now_ms();

        let mut local = session.canonical.clone();
        local.seal()?;
        let decision = self
            .inner
            .resolver
            .compare(&user_id, Some(&local), remote.as_ref(), now);

        match decision.winner {
            Winner::Remote => {
                let adopted = self.inner.offline.recompute(&decision.canonical, now);
                let stored = self.inner.local.save(&user_id, &adopted).await?;
                session.tracker.observe_version(stored.version);
                session.tracker.record_remote_ack(stored.version);
                session.metadata.record_local_save(stored.version, now);
                session.metadata.record_remote_sync(stored.version, now);
                self.inner.local.set_metadata(&user_id, &session.metadata).await?;
                session.canonical = stored.with_source(SourceTag::Remote);
                session.dirty = false;
                info!(user_id = %user_id, sent = conflict.sent, remote = conflict.remote, "adopted newer remote snapshot");
                Ok(Some(local))
            }
            Winner::Local | Winner::Default => {
                session.tracker.observe_version(conflict.remote);
                session.dirty = true;
                session.pending_critical = true;
                info!(user_id = %user_id, sent = conflict.sent, remote = conflict.remote, "local snapshot wins, re-saving above remote version");
                self.persist_session(session).await?;
                Ok(None)
            }
        }
    }

    /// Put permanently failed remote saves back in line.
    pub async fn retry_failed(&self) -> usize {
        self.inner.queue.retry_exhausted()
    }

    /// Queue counts.
    pub async fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// Discard the session user's local copies (primary, backup, metadata and
    /// emergency capture). The next [`load`](Self::load) starts from the
    /// remote or a default.
    pub async fn reset_local(&self) -> PersistResult<()> {
        let mut guard = self.inner.session.lock().await;
        let session = guard.as_mut().ok_or(PersistError::NoSession)?;
        self.debouncer().cancel();
        self.inner.local.clear(&session.user_id).await?;

        let now = self.inner.clock.now_ms();
        session.canonical = StateSnapshot::default_for(&session.user_id, now);
        session.tracker.reset();
        session.metadata = SyncMetadata::default();
        session.dirty = false;
        session.pending_critical = false;
        session.loaded = false;
        warn!(user_id = %session.user_id, "local progress reset");
        Ok(())
    }

    /// Run queue passes in the background: every worker interval and
    /// whenever the network comes back online.
    pub fn spawn_sync_worker(&self) -> SyncWorkerHandle {
        let token = CancellationToken::new();
        let this = self.clone();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut online = this.inner.network.subscribe();
            let mut watching = true;
            let mut ticker = tokio::time::interval(this.inner.config.worker_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                    changed = online.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                            continue;
                        }
                        if !*online.borrow_and_update() {
                            continue;
                        }
                        info!("network back online, processing sync queue");
                    }
                }
                if let Err(e) = this.process_queue().await {
                    warn!(error = %e, "background sync pass failed");
                }
            }
            debug!("sync worker stopped");
        });

        SyncWorkerHandle { token, handle }
    }
}
