//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use progress_sync::prelude::*;

pub const USER: &str = "player-1";
pub const START_MS: u64 = 1_700_000_000_000;

/// Install a log subscriber once; `RUST_LOG=progress_sync=debug` shows engine logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A coordinator wired to in-memory collaborators that outlive it, so a test
/// can "restart" the engine over the same stores.
pub struct Harness {
    pub config: EngineConfig,
    pub store: Arc<MemoryStore>,
    pub emergency_store: Arc<MemoryStore>,
    pub remote: Arc<MemoryRemote>,
    pub network: Arc<NetworkStatus>,
    pub clock: Arc<ManualClock>,
    pub local: Arc<SecureLocalStore>,
    pub engine: SyncCoordinator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    pub fn with_store(config: EngineConfig, store: MemoryStore) -> Self {
        init_tracing();
        let store = Arc::new(store);
        let emergency_store = Arc::new(MemoryStore::new());
        let remote = Arc::new(MemoryRemote::new());
        let network = Arc::new(NetworkStatus::new(true));
        let clock = Arc::new(ManualClock::new(START_MS));

        let collaborators = Self::collaborators(
            &config,
            &store,
            &emergency_store,
            &remote,
            &network,
            &clock,
        );
        let local = Arc::clone(&collaborators.local);
        let engine = SyncCoordinator::new(config.clone(), collaborators).unwrap();

        Self {
            config,
            store,
            emergency_store,
            remote,
            network,
            clock,
            local,
            engine,
        }
    }

    fn collaborators(
        config: &EngineConfig,
        store: &Arc<MemoryStore>,
        emergency_store: &Arc<MemoryStore>,
        remote: &Arc<MemoryRemote>,
        network: &Arc<NetworkStatus>,
        clock: &Arc<ManualClock>,
    ) -> Collaborators {
        Collaborators::new(
            config,
            store.clone(),
            emergency_store.clone(),
            DeviceSecret::from_bytes([7u8; 32]),
            remote.clone(),
            network.clone(),
            clock.clone(),
        )
    }

    /// A fresh coordinator over the same stores, as after an app restart.
    pub fn restart(&mut self) {
        let collaborators = Self::collaborators(
            &self.config,
            &self.store,
            &self.emergency_store,
            &self.remote,
            &self.network,
            &self.clock,
        );
        self.local = Arc::clone(&collaborators.local);
        self.engine = SyncCoordinator::new(self.config.clone(), collaborators).unwrap();
    }
}

/// A sealed snapshot for [`USER`].
pub fn sealed(version: u64, saved_at: u64, coins: f64) -> StateSnapshot {
    let mut s = StateSnapshot::default_for(USER, saved_at);
    s.version = version;
    s.inventory.set("coins", coins);
    s.seal().unwrap();
    s
}
