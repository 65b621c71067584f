//! Property tests over the local tier.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use progress_sync::prelude::*;
use proptest::prelude::*;

fn local_store() -> SecureLocalStore {
    let emergency = Arc::new(EmergencyBackupManager::new(
        Arc::new(MemoryStore::new()),
        DEFAULT_EMERGENCY_MAX_BYTES,
        DEFAULT_EMERGENCY_MAX_ENTRIES,
    ));
    SecureLocalStore::new(
        Arc::new(MemoryStore::new()),
        PayloadCipher::new(DeviceSecret::from_bytes([9u8; 32])),
        emergency,
        vec!["auth:".into()],
    )
}

fn snapshot_strategy() -> impl Strategy<Value = StateSnapshot> {
    let counters = prop::collection::btree_map("[a-z]{1,8}", -1e9f64..1e9, 0..6);
    let accruing = prop::collection::btree_map(
        "[a-z]{1,8}",
        (1.0f64..1e4, 0.0f64..1.0, 0.0f64..100.0, 0u64..4_000_000_000_000),
        0..3,
    );
    (
        "[a-zA-Z0-9-]{1,24}",
        0u64..1_000_000,
        0u64..4_000_000_000_000,
        counters,
        accruing,
    )
        .prop_map(|(user_id, version, saved_at, counters, accruing)| {
            let accruing: BTreeMap<String, AccruingResource> = accruing
                .into_iter()
                .map(|(name, (capacity, fill, rate, at))| {
                    (name, AccruingResource::new(capacity * fill, capacity, rate, at))
                })
                .collect();
            let mut s = StateSnapshot::default_for(&user_id, saved_at);
            s.version = version;
            s.inventory = Inventory { counters, accruing };
            s
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_save_then_load_round_trips(snapshot in snapshot_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = local_store();
        let user_id = snapshot.user_id.clone();

        let loaded = runtime.block_on(async {
            store.save(&user_id, &snapshot).await.unwrap();
            store.load(&user_id).await.unwrap().unwrap()
        });

        prop_assert!(!loaded.integrity_failed);
        prop_assert!(loaded.verify());
        prop_assert!(loaded.same_state(&snapshot));
    }

    #[test]
    fn prop_saved_versions_survive_reordering_of_resolution(
        a in 0u64..100,
        b in 0u64..100,
    ) {
        let resolver = ConflictResolver::new();
        let mut left = StateSnapshot::default_for(common::USER, 10);
        left.version = a;
        left.seal().unwrap();
        let mut right = StateSnapshot::default_for(common::USER, 20);
        right.version = b;
        right.seal().unwrap();

        let forward = resolver.compare(common::USER, Some(&left), Some(&right), 0);
        let backward = resolver.compare(common::USER, Some(&right), Some(&left), 0);
        prop_assert_eq!(forward.canonical.version, a.max(b));
        prop_assert_eq!(backward.canonical.version, a.max(b));
    }
}
