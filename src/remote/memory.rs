//! In-process remote store with scriptable failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{RemoteError, RemoteSaveAck, RemoteStore};
use crate::snapshot::{SourceTag, StateSnapshot};

#[derive(Debug, Default)]
struct Inner {
    latest: HashMap<String, StateSnapshot>,
    backups: HashMap<String, Vec<StateSnapshot>>,
    save_failures: VecDeque<RemoteError>,
    load_failure: Option<RemoteError>,
    latency: Duration,
    saves: Vec<(String, u64)>,
}

/// [`RemoteStore`] held in memory.
///
/// Saves of a version older than the one already held are answered with
/// [`RemoteError::VersionConflict`], like an authoritative server would.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    /// Empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed the remote copy of a user.
    pub fn insert(&self, snapshot: StateSnapshot) {
        self.lock().latest.insert(snapshot.user_id.clone(), snapshot);
    }

    /// The remote copy of a user.
    pub fn get(&self, user_id: &str) -> Option<StateSnapshot> {
        self.lock().latest.get(user_id).cloned()
    }

    /// Side copies received through `backup`.
    pub fn backups(&self, user_id: &str) -> Vec<StateSnapshot> {
        self.lock().backups.get(user_id).cloned().unwrap_or_default()
    }

    /// Fail the next `count` saves with `error`.
    pub fn fail_next_saves(&self, count: usize, error: RemoteError) {
        let mut inner = self.lock();
        inner.save_failures.extend(std::iter::repeat_n(error, count));
    }

    /// Make every load fail with `error`, or succeed again with `None`.
    pub fn fail_loads(&self, error: Option<RemoteError>) {
        self.lock().load_failure = error;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// `(user_id, version)` of every save attempt, in order.
    pub fn save_log(&self) -> Vec<(String, u64)> {
        self.lock().saves.clone()
    }

    async fn delay(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn save(
        &self,
        user_id: &str,
        snapshot: &StateSnapshot,
        version: u64,
    ) -> Result<RemoteSaveAck, RemoteError> {
        self.delay().await;
        let mut inner = self.lock();
        inner.saves.push((user_id.to_string(), version));

        if let Some(error) = inner.save_failures.pop_front() {
            return Err(error);
        }
        if let Some(held) = inner.latest.get(user_id)
            && held.version > version
        {
            return Err(RemoteError::VersionConflict {
                sent: version,
                remote: held.version,
            });
        }

        let mut stored = snapshot.clone().with_source(SourceTag::Remote);
        stored.version = version;
        inner.latest.insert(user_id.to_string(), stored);
        Ok(RemoteSaveAck {
            storage_type: "memory".to_string(),
        })
    }

    async fn load(&self, user_id: &str) -> Result<Option<StateSnapshot>, RemoteError> {
        self.delay().await;
        let inner = self.lock();
        if let Some(error) = &inner.load_failure {
            return Err(error.clone());
        }
        Ok(inner.latest.get(user_id).cloned())
    }

    async fn backup(
        &self,
        user_id: &str,
        snapshot: &StateSnapshot,
        version: u64,
    ) -> Result<(), RemoteError> {
        self.delay().await;
        let mut stored = snapshot.clone();
        stored.version = version;
        self.lock()
            .backups
            .entry(user_id.to_string())
            .or_default()
            .push(stored);
        Ok(())
    }
}
