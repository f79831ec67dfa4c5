use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use prefstore::{
    KeyedPreferenceStore, NamespaceId, PrefError, PrefKey, PrefKind, PrefValue, PreferenceRegistry,
    RegistryConfig, WatchConfig,
};

const USERNAME: PrefKey<String> = PrefKey::new("username");
const LAUNCHES: PrefKey<i32> = PrefKey::new("launches");
const ONBOARDED: PrefKey<bool> = PrefKey::new("onboarded");
const VOLUME: PrefKey<f32> = PrefKey::new("volume");
const LAST_SYNC: PrefKey<i64> = PrefKey::new("last_sync");
const RATIO: PrefKey<f64> = PrefKey::new("ratio");
const TAGS: PrefKey<BTreeSet<String>> = PrefKey::new("tags");

const WAIT: Duration = Duration::from_secs(2);

fn registry() -> PreferenceRegistry {
    PreferenceRegistry::new(RegistryConfig::new("com.example.notes")).unwrap()
}

#[test]
fn typed_keys_round_trip() {
    let registry = registry();
    let store = registry.store("settings").unwrap();
    let tags: BTreeSet<String> = ["work", "home"].iter().map(ToString::to_string).collect();

    store.save(USERNAME, "grace".to_string()).unwrap();
    store.save(LAUNCHES, 12).unwrap();
    store.save(ONBOARDED, true).unwrap();
    store.save(VOLUME, 0.75).unwrap();
    store.save(LAST_SYNC, 1_700_000_000_000).unwrap();
    store.save(RATIO, 1.618).unwrap();
    store.save(TAGS, tags.clone()).unwrap();

    assert_eq!(store.get(USERNAME, String::new()).unwrap(), "grace");
    assert_eq!(store.get(LAUNCHES, 0).unwrap(), 12);
    assert!(store.get(ONBOARDED, false).unwrap());
    assert!((store.get(VOLUME, 0.0).unwrap() - 0.75).abs() < f32::EPSILON);
    assert_eq!(store.get(LAST_SYNC, 0).unwrap(), 1_700_000_000_000);
    assert!((store.get(RATIO, 0.0).unwrap() - 1.618).abs() < f64::EPSILON);
    assert_eq!(store.get(TAGS, BTreeSet::new()).unwrap(), tags);

    let mut keys = store.list_keys().unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec!["last_sync", "launches", "onboarded", "ratio", "tags", "username", "volume"]
    );
}

#[test]
fn missing_keys_return_defaults() {
    let registry = registry();
    let store = registry.store("settings").unwrap();

    assert_eq!(store.get(LAUNCHES, 42).unwrap(), 42);
    assert_eq!(store.get_opt(USERNAME).unwrap(), None);
    assert!(!store.contains("launches").unwrap());
    assert_eq!(store.kind_of("launches").unwrap(), None);
}

#[test]
fn last_write_wins() {
    let registry = registry();
    let store = registry.store("settings").unwrap();

    store.save(LAUNCHES, 1).unwrap();
    store.save(LAUNCHES, 2).unwrap();
    assert_eq!(store.get(LAUNCHES, 0).unwrap(), 2);
}

#[test]
fn remove_deletes_whatever_kind_is_stored() {
    let registry = registry();
    let store = registry.store("settings").unwrap();

    store.save("mixed", 5i64).unwrap();
    store.save("mixed", "five".to_string()).unwrap();
    assert_eq!(store.kind_of("mixed").unwrap(), Some(PrefKind::String));

    assert!(store.remove("mixed").unwrap());
    assert!(!store.contains("mixed").unwrap());
    assert_eq!(store.get("mixed", 0i64).unwrap(), 0);
}

#[test]
fn clear_empties_namespace() {
    let registry = registry();
    let store = registry.store("settings").unwrap();

    for i in 0..10 {
        store.save(format!("k{i}"), i).unwrap();
    }
    assert_eq!(store.list_keys().unwrap().len(), 10);

    store.clear().unwrap();
    assert!(store.list_keys().unwrap().is_empty());
    assert!(store.snapshot().unwrap().is_empty());
}

#[test]
fn namespaces_are_isolated() {
    let registry = registry();
    let settings = registry.store("settings").unwrap();
    let session = registry.store("session").unwrap();

    settings.save(USERNAME, "grace".to_string()).unwrap();
    session.save(USERNAME, "guest".to_string()).unwrap();
    session.clear().unwrap();

    assert_eq!(settings.get(USERNAME, String::new()).unwrap(), "grace");
    assert!(!session.contains("username").unwrap());

    let ids: Vec<String> = registry
        .namespaces()
        .iter()
        .map(|n| n.as_str().to_string())
        .collect();
    assert_eq!(
        ids,
        vec![
            "com.example.notes_datastore_session",
            "com.example.notes_datastore_settings"
        ]
    );
}

#[test]
fn registry_hands_out_one_store_per_namespace() {
    let registry = Arc::new(registry());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.store("shared").unwrap())
        })
        .collect();
    let stores: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for store in &stores[1..] {
        assert!(Arc::ptr_eq(&stores[0], store));
    }
    assert_eq!(registry.namespaces().len(), 1);
}

#[test]
fn concurrent_writers_are_serialized() {
    let registry = registry();
    let store = registry.store("counters").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..50 {
                    store.save(format!("t{t}_{i}"), i).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.list_keys().unwrap().len(), 200);
}

#[test]
fn watch_delivers_current_value_then_each_write() {
    let registry = registry();
    let store = registry.store("settings").unwrap();
    store.save(LAUNCHES, 1).unwrap();

    let stream = store.watch(LAUNCHES, 0).unwrap();
    assert_eq!(stream.recv_timeout(WAIT).unwrap(), 1);

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store.save(LAUNCHES, 2).unwrap();
            store.save(LAUNCHES, 3).unwrap();
            store.clear().unwrap();
        })
    };
    writer.join().unwrap();

    assert_eq!(stream.recv_timeout(WAIT).unwrap(), 2);
    assert_eq!(stream.recv_timeout(WAIT).unwrap(), 3);
    assert_eq!(stream.recv_timeout(WAIT).unwrap(), 0);
}

#[test]
fn watch_maps_other_kinds_to_default() {
    let registry = registry();
    let store = registry.store("settings").unwrap();
    store.save("launches", "many".to_string()).unwrap();

    let stream = store.watch(LAUNCHES, -1).unwrap();
    assert_eq!(stream.recv_timeout(WAIT).unwrap(), -1);
}

#[test]
fn cancelled_watch_leaves_data_alone() {
    let registry = registry();
    let store = registry.store("settings").unwrap();

    let stream = store.watch(ONBOARDED, false).unwrap();
    stream.unsubscribe();
    store.save(ONBOARDED, true).unwrap();

    assert!(store.get(ONBOARDED, false).unwrap());
    assert_eq!(store.subscriber_count(), 0);
    assert!(matches!(stream.recv(), Ok(false) | Err(PrefError::Disconnected)));
}

#[test]
fn slow_watcher_sees_latest_value() {
    let ns = NamespaceId::new("app", "datastore", "slow").unwrap();
    let store = KeyedPreferenceStore::new(
        ns,
        Arc::new(prefstore::InMemoryBackend::new()),
        &WatchConfig { stream_capacity: 4 },
    );

    let stream = store.watch(LAUNCHES, 0).unwrap();
    for i in 1..=100 {
        store.save(LAUNCHES, i).unwrap();
    }

    assert_eq!(stream.latest(), Some(100));
    assert!(store.dropped_events() > 0);
}

#[test]
fn watch_all_reports_old_and_new_values() {
    let registry = registry();
    let store = registry.store("settings").unwrap();
    store.save(LAUNCHES, 1).unwrap();

    let changes = store.watch_all().unwrap();
    store.save(LAUNCHES, 2).unwrap();
    store.remove("launches").unwrap();

    let first = changes.recv_timeout(WAIT).unwrap();
    assert_eq!(first.old, Some(PrefValue::Int(1)));
    assert_eq!(first.new, Some(PrefValue::Int(2)));

    let second = changes.recv_timeout(WAIT).unwrap();
    assert_eq!(second.old, Some(PrefValue::Int(2)));
    assert_eq!(second.new, None);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct WindowState {
    width: u32,
    height: u32,
    maximized: bool,
}

#[test]
fn json_values_are_stored_as_strings() {
    let registry = registry();
    let store = registry.store("ui").unwrap();
    let state = WindowState {
        width: 1280,
        height: 720,
        maximized: false,
    };

    store.save_json("window", &state).unwrap();
    assert_eq!(store.kind_of("window").unwrap(), Some(PrefKind::String));
    assert_eq!(store.get_json::<WindowState>("window").unwrap(), Some(state));
    assert_eq!(store.get_json::<WindowState>("absent").unwrap(), None);

    store.save("window", "[]".to_string()).unwrap();
    let err = store.get_json::<WindowState>("window").unwrap_err();
    assert!(matches!(err, PrefError::Serialization { .. }));
}

#[test]
fn edit_commits_batch_atomically() {
    let registry = registry();
    let store = registry.store("ui").unwrap();
    store.save("stale", true).unwrap();

    let changes = store.watch_all().unwrap();
    store
        .edit(|e| {
            e.clear().put("width", 1024).put("height", 768);
        })
        .unwrap();

    let mut keys = store.list_keys().unwrap();
    keys.sort();
    assert_eq!(keys, vec!["height", "width"]);

    let mut touched = Vec::new();
    while let Some(change) = changes.try_recv() {
        touched.push(change.key);
    }
    touched.sort();
    assert_eq!(touched, vec!["height", "stale", "width"]);
}

#[test]
fn invalid_frontend_ids_are_rejected() {
    let registry = registry();
    for bad in ["", "..", "a/b", "has space"] {
        let err = registry.store(bad).unwrap_err();
        assert!(err.is_validation(), "expected validation error for {bad:?}");
    }
}
