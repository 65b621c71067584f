//! End-to-end scenarios across local, remote and emergency tiers.

mod common;

use std::time::Duration;

use common::{Harness, START_MS, USER, sealed};
use progress_sync::prelude::*;

const MINUTE: u64 = 60_000;

#[tokio::test]
async fn test_local_newer_is_pushed_to_remote() {
    let h = Harness::new();
    let mut local = StateSnapshot::default_for(USER, 100);
    local.version = 3;
    local.last_saved_at = 100;
    local.inventory.set("coins", 30.0);
    h.local.save(USER, &local).await.unwrap();
    h.remote.insert(sealed(2, 90, 20.0));

    let loaded = h.engine.load(USER).await;
    assert_eq!(loaded.version, 3);
    assert_eq!(loaded.source, SourceTag::Local);
    assert_eq!(h.engine.queue_stats().await.pending, 1);

    let report = h.engine.process_queue().await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    let remote = h.remote.get(USER).unwrap();
    assert_eq!(remote.version, 3);
    assert_eq!(remote.inventory.counter("coins"), 30.0);
    assert_eq!(h.local.metadata(USER).await.unwrap().remote_confirmed_version, 3);
}

#[tokio::test]
async fn test_offline_accrual_on_load() {
    let mut h = Harness::new();
    let mut local = StateSnapshot::default_for(USER, START_MS);
    local.version = 1;
    local.inventory.accruing.insert(
        "energy".into(),
        AccruingResource::new(80.0, 100.0, 1.0, START_MS),
    );
    h.local.save(USER, &local).await.unwrap();

    let now = h.clock.advance(Duration::from_millis(30 * MINUTE));
    h.restart();
    let loaded = h.engine.load(USER).await;
    let energy = &loaded.inventory.accruing["energy"];
    assert_eq!(energy.value, 100.0);
    assert_eq!(energy.last_update_timestamp, now);

    // Loading again at the same instant changes nothing.
    let again = h.engine.load(USER).await;
    assert_eq!(again.inventory.accruing["energy"], *energy);
}

#[tokio::test]
async fn test_partial_accrual_is_not_double_counted() {
    let mut h = Harness::new();
    let mut local = StateSnapshot::default_for(USER, START_MS);
    local.version = 1;
    local.inventory.accruing.insert(
        "energy".into(),
        AccruingResource::new(50.0, 100.0, 1.0, START_MS),
    );
    h.local.save(USER, &local).await.unwrap();

    let now = h.clock.advance(Duration::from_millis(10 * MINUTE));
    h.restart();
    h.engine.load(USER).await;
    let loaded = h.engine.load(USER).await;
    assert_eq!(loaded.inventory.accruing["energy"].available(now), 60.0);

    // Spending materializes exactly the accrued amount.
    h.engine.save(MutationEvent::new().spend("energy", 60.0)).await.unwrap();
    h.engine.flush().await.unwrap();
    let energy = h.engine.canonical().await.unwrap().inventory.accruing["energy"].clone();
    assert_eq!(energy.value, 0.0);
    assert_eq!(energy.last_update_timestamp, now);
}

#[tokio::test(start_paused = true)]
async fn test_offline_queue_drains_on_reconnect() {
    let h = Harness::new();
    h.network.set_online(false);
    h.engine.load(USER).await;

    for coins in [1.0, 2.0, 3.0] {
        h.engine.save(MutationEvent::new().add("coins", coins)).await.unwrap();
        h.engine.flush().await.unwrap();
    }
    let report = h.engine.process_queue().await.unwrap();
    assert!(report.skipped_offline);
    assert_eq!(h.engine.queue_stats().await.pending, 3);
    assert!(h.remote.save_log().is_empty());

    h.network.set_online(true);
    let report = h.engine.process_queue().await.unwrap();
    assert_eq!(report.attempted.len(), 3);
    let versions: Vec<u64> = h.remote.save_log().into_iter().map(|(_, v)| v).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert_eq!(h.engine.queue_stats().await.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_worker_runs_pass_when_network_returns() {
    let h = Harness::new();
    h.network.set_online(false);
    h.engine.load(USER).await;
    h.engine
        .save(MutationEvent::new().add("coins", 5.0).critical())
        .await
        .unwrap();
    h.engine.flush().await.unwrap();

    let worker = h.engine.spawn_sync_worker();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.remote.get(USER).is_none());

    h.network.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.remote.get(USER).unwrap().version, 1);

    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_worker_retries_on_interval() {
    let config = EngineConfig::builder()
        .worker_interval(Duration::from_secs(5))
        .retry_delays(Duration::from_secs(1), Duration::from_secs(2))
        .build()
        .unwrap();
    let h = Harness::with_config(config);
    h.engine.load(USER).await;
    h.remote.fail_next_saves(1, RemoteError::Unavailable);
    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();

    let worker = h.engine.spawn_sync_worker();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.remote.get(USER).is_none());
    assert_eq!(h.engine.queue_stats().await.retrying, 1);

    h.clock.advance(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.remote.get(USER).unwrap().version, 1);

    worker.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(worker.is_finished());
}

#[tokio::test]
async fn test_exhausted_retries_surface_error_with_emergency_backup() {
    let config = EngineConfig::builder()
        .max_attempts(2)
        .retry_delays(Duration::from_secs(1), Duration::from_secs(2))
        .build()
        .unwrap();
    let h = Harness::with_config(config);
    h.engine.load(USER).await;
    h.remote.fail_next_saves(2, RemoteError::Rejected("maintenance".into()));
    h.engine.save(MutationEvent::new().add("xp", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();
    let mut events = h.engine.subscribe();

    let first = h.engine.process_queue().await.unwrap();
    assert_eq!(first.retried.len(), 1);
    assert!(events.try_recv().is_err());

    h.clock.advance(Duration::from_secs(10));
    let second = h.engine.process_queue().await.unwrap();
    assert_eq!(second.exhausted.len(), 1);
    assert!(matches!(
        events.try_recv(),
        Ok(SyncEvent::StateSaveError { user_id, error }) if user_id == USER && error.contains("maintenance")
    ));
    let record = h.local.emergency().latest(USER).unwrap().unwrap();
    assert!(record.version >= 1);
    assert_eq!(h.engine.queue_stats().await.exhausted, 1);

    // Parked until a manual retry.
    h.clock.advance(Duration::from_secs(600));
    assert!(h.engine.process_queue().await.unwrap().attempted.is_empty());
    assert_eq!(h.engine.retry_failed().await, 1);
    let third = h.engine.process_queue().await.unwrap();
    assert_eq!(third.delivered.len(), 1);
    assert_eq!(h.remote.get(USER).unwrap().version, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_remote_times_out_and_retries() {
    let config = EngineConfig::builder()
        .remote_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let h = Harness::with_config(config);
    h.engine.load(USER).await;
    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();

    h.remote.set_latency(Duration::from_secs(30));
    let report = h.engine.process_queue().await.unwrap();
    assert_eq!(report.retried.len(), 1);
    assert!(h.remote.get(USER).is_none());

    h.remote.set_latency(Duration::ZERO);
    h.clock.advance(Duration::from_secs(5));
    let report = h.engine.process_queue().await.unwrap();
    assert_eq!(report.delivered.len(), 1);
}

#[tokio::test]
async fn test_version_conflict_adopts_newer_remote() {
    let h = Harness::new();
    h.engine.load(USER).await;
    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();

    // Another device pushed a newer version in the meantime.
    h.remote.insert(sealed(5, START_MS, 500.0));
    let report = h.engine.process_queue().await.unwrap();
    assert_eq!(report.conflicts.len(), 1);

    let canonical = h.engine.canonical().await.unwrap();
    assert_eq!(canonical.version, 5);
    assert_eq!(canonical.inventory.counter("coins"), 500.0);
    assert_eq!(h.remote.backups(USER)[0].inventory.counter("coins"), 1.0);
    assert_eq!(h.local.load(USER).await.unwrap().unwrap().version, 5);

    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();
    assert_eq!(h.engine.canonical().await.unwrap().version, 6);
}

#[tokio::test]
async fn test_version_conflict_with_corrupt_remote_keeps_local() {
    let h = Harness::new();
    let mut local = StateSnapshot::default_for(USER, START_MS);
    local.version = 2;
    local.inventory.set("coins", 20.0);
    h.local.save(USER, &local).await.unwrap();

    let mut corrupt = sealed(4, START_MS, 40.0);
    corrupt.inventory.set("coins", 4_000.0);
    h.remote.insert(corrupt);

    let loaded = h.engine.load(USER).await;
    assert_eq!(loaded.version, 2);

    let report = h.engine.process_queue().await.unwrap();
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(h.engine.canonical().await.unwrap().version, 5);

    h.engine.process_queue().await.unwrap();
    let remote = h.remote.get(USER).unwrap();
    assert_eq!(remote.version, 5);
    assert_eq!(remote.inventory.counter("coins"), 20.0);
}

#[tokio::test]
async fn test_quota_eviction_keeps_critical_keys() {
    let store = MemoryStore::new();
    store.set("auth:session", b"token").unwrap();
    store.set("identity:device", b"device-1").unwrap();
    store.set("cache:atlas", &vec![0u8; 8_000]).unwrap();
    store.set_quota(Some(store.usage_bytes() + 256));

    let h = Harness::with_store(EngineConfig::default(), store);
    h.engine.load(USER).await;
    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    assert!(h.engine.flush().await.unwrap());

    assert!(h.store.get("cache:atlas").unwrap().is_none());
    assert_eq!(h.store.get("auth:session").unwrap(), Some(b"token".to_vec()));
    assert_eq!(h.store.get("identity:device").unwrap(), Some(b"device-1".to_vec()));
    assert_eq!(h.local.load(USER).await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn test_sync_interval_gates_remote_push() {
    let config = EngineConfig::builder()
        .remote_sync_interval(Duration::from_secs(30))
        .build()
        .unwrap();
    let h = Harness::with_config(config);
    h.engine.load(USER).await;

    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();
    h.engine.process_queue().await.unwrap();
    assert_eq!(h.remote.get(USER).unwrap().version, 1);

    // Synced just now: the next ordinary save stays local.
    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();
    assert_eq!(h.engine.queue_stats().await.total(), 0);

    // A critical save goes out regardless.
    h.engine
        .save(MutationEvent::new().add("coins", 1.0).critical())
        .await
        .unwrap();
    h.engine.flush().await.unwrap();
    assert_eq!(h.engine.queue_stats().await.pending, 1);
    h.engine.process_queue().await.unwrap();
    assert_eq!(h.remote.get(USER).unwrap().version, 3);

    // Once the interval passes, an unqueued save is picked up by the next pass.
    h.engine.save(MutationEvent::new().add("coins", 1.0)).await.unwrap();
    h.engine.flush().await.unwrap();
    h.clock.advance(Duration::from_secs(31));
    h.engine.process_queue().await.unwrap();
    assert_eq!(h.remote.get(USER).unwrap().version, 4);
}
