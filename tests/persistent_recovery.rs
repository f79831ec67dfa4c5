//! Crash recovery tests for the persistent backend.
//!
//! These tests verify that namespaces on disk:
//! - survive reopen, including after compaction
//! - lose only the torn record after a crash mid-append
//! - reject a second concurrent opener

#![cfg(feature = "persistent")]

use std::fs;
use std::path::Path;

use prefstore::{
    open_namespace, PersistentConfig, PrefValue, PreferenceBackend, PreferenceRegistry,
    RegistryConfig,
};
use tempfile::tempdir;

fn fast_config() -> PersistentConfig {
    PersistentConfig {
        sync_on_write: false,
        ..PersistentConfig::default()
    }
}

fn registry(data_dir: &Path) -> PreferenceRegistry {
    PreferenceRegistry::new(RegistryConfig::new("app").persistent(data_dir, fast_config())).unwrap()
}

#[test]
fn values_survive_registry_restart() {
    let dir = tempdir().unwrap();

    {
        let registry = registry(dir.path());
        let store = registry.store("settings").unwrap();
        store.save("theme", "dark".to_string()).unwrap();
        store.save("launches", 3i32).unwrap();
        store.save("obsolete", true).unwrap();
        store.remove("obsolete").unwrap();
    }

    let registry = registry(dir.path());
    let store = registry.store("settings").unwrap();
    assert_eq!(store.get("theme", String::new()).unwrap(), "dark");
    assert_eq!(store.get("launches", 0i32).unwrap(), 3);
    assert!(!store.contains("obsolete").unwrap());
}

#[test]
fn torn_wal_tail_loses_only_last_commit() {
    let dir = tempdir().unwrap();
    let ns_dir = dir.path().join("app_datastore_settings");

    {
        let registry = registry(dir.path());
        let store = registry.store("settings").unwrap();
        for i in 0..5i64 {
            store.save(format!("k{i}"), i).unwrap();
        }
    }

    // Simulate a crash partway through the last append.
    let wal_path = ns_dir.join("prefs.wal");
    let file = fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
    let size = file.metadata().unwrap().len();
    file.set_len(size - 3).unwrap();
    drop(file);

    {
        let registry = registry(dir.path());
        let store = registry.store("settings").unwrap();
        for i in 0..4i64 {
            assert_eq!(store.get(format!("k{i}"), -1i64).unwrap(), i);
        }
        assert!(!store.contains("k4").unwrap());

        // Appends after recovery must not land behind the torn bytes.
        store.save("after", true).unwrap();
    }

    let registry = registry(dir.path());
    let store = registry.store("settings").unwrap();
    assert!(store.get("after", false).unwrap());
    assert_eq!(store.list_keys().unwrap().len(), 5);
}

#[test]
fn corrupted_checksum_drops_record() {
    let dir = tempdir().unwrap();

    {
        let backend = open_namespace(dir.path(), Some(fast_config())).unwrap();
        backend
            .apply(vec![prefstore::Mutation::Put {
                key: "kept".to_string(),
                value: PrefValue::Int(1),
            }])
            .unwrap();
        backend
            .apply(vec![prefstore::Mutation::Put {
                key: "flipped".to_string(),
                value: PrefValue::Int(2),
            }])
            .unwrap();
    }

    let wal_path = dir.path().join("prefs.wal");
    let mut bytes = fs::read(&wal_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&wal_path, bytes).unwrap();

    let backend = open_namespace(dir.path(), Some(fast_config())).unwrap();
    assert_eq!(backend.get("kept").unwrap(), Some(PrefValue::Int(1)));
    assert_eq!(backend.get("flipped").unwrap(), None);
}

#[test]
fn compaction_preserves_values_across_reopen() {
    let dir = tempdir().unwrap();

    {
        let backend = open_namespace(dir.path(), Some(fast_config())).unwrap();
        for i in 0..20 {
            backend
                .apply(vec![prefstore::Mutation::Put {
                    key: format!("k{}", i % 5),
                    value: PrefValue::Int(i),
                }])
                .unwrap();
        }
        let result = backend.compact().unwrap();
        assert_eq!(result.entries_compacted, 5);
        assert!(result.wal_size_after < result.wal_size_before);

        backend.apply(vec![prefstore::Mutation::Clear]).unwrap();
        backend
            .apply(vec![prefstore::Mutation::Put {
                key: "fresh".to_string(),
                value: PrefValue::Bool(true),
            }])
            .unwrap();
    }

    let backend = open_namespace(dir.path(), Some(fast_config())).unwrap();
    assert_eq!(backend.keys().unwrap(), vec!["fresh".to_string()]);
}

#[test]
fn automatic_compaction_keeps_latest_values() {
    let dir = tempdir().unwrap();
    let config = PersistentConfig {
        max_wal_size: 4 * 1024,
        sync_on_write: false,
    };

    {
        let registry = PreferenceRegistry::new(
            RegistryConfig::new("app").persistent(dir.path(), config.clone()),
        )
        .unwrap();
        let store = registry.store("busy").unwrap();
        for i in 0..500i32 {
            store.save("counter", i).unwrap();
            store.save(format!("slot{}", i % 7), i).unwrap();
        }
    }

    let ns_dir = dir.path().join("app_datastore_busy");
    assert!(ns_dir.join("prefs.snap").exists());

    let registry =
        PreferenceRegistry::new(RegistryConfig::new("app").persistent(dir.path(), config)).unwrap();
    let store = registry.store("busy").unwrap();
    assert_eq!(store.get("counter", 0i32).unwrap(), 499);
    assert_eq!(store.get("slot0", -1i32).unwrap(), 497);
    assert_eq!(store.list_keys().unwrap().len(), 8);
}

#[test]
fn second_registry_cannot_open_locked_namespace() {
    let dir = tempdir().unwrap();
    let first = registry(dir.path());
    let _store = first.store("settings").unwrap();

    let second = registry(dir.path());
    let err = second.store("settings").unwrap_err();
    assert!(err.is_storage());

    // Other namespaces in the same data dir are unaffected.
    assert!(second.store("session").is_ok());
}

#[test]
fn leftover_snapshot_temp_files_are_ignored() {
    let dir = tempdir().unwrap();
    {
        let backend = open_namespace(dir.path(), Some(fast_config())).unwrap();
        backend
            .apply(vec![prefstore::Mutation::Put {
                key: "k".to_string(),
                value: PrefValue::Long(7),
            }])
            .unwrap();
        backend.compact().unwrap();
    }
    fs::write(dir.path().join("prefs.snap.tmp.interrupted"), b"garbage").unwrap();

    let backend = open_namespace(dir.path(), Some(fast_config())).unwrap();
    assert_eq!(backend.get("k").unwrap(), Some(PrefValue::Long(7)));
    assert!(!dir.path().join("prefs.snap.tmp.interrupted").exists());
}
