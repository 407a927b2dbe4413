//! KeyStore Tests
//!
//! Tests verify:
//! - Lookups on present and absent keys
//! - Pre-populated stores (recovered state)
//! - Snapshot copies
//! - Concurrent readers

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use epochkv::store::KeyStore;
use epochkv::ResultCode;

// =============================================================================
// Helper Functions
// =============================================================================

fn populated(n: usize) -> KeyStore {
    let map: HashMap<String, String> = (0..n)
        .map(|i| (format!("key{}", i), format!("value{}", i)))
        .collect();
    KeyStore::from_map(map)
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_store_is_empty() {
    let store = KeyStore::new();
    assert!(store.is_empty());
    assert_eq!(store.len(), 0);
}

#[test]
fn test_get_missing_key() {
    let store = KeyStore::new();
    assert_eq!(store.get("missing"), (ResultCode::NotFound, String::new()));
}

#[test]
fn test_get_present_key() {
    let store = populated(3);
    assert_eq!(store.get("key1"), (ResultCode::Ok, "value1".to_string()));
    assert_eq!(store.len(), 3);
}

#[test]
fn test_keys_are_case_sensitive() {
    let store = populated(1);
    assert_eq!(store.get("KEY0").0, ResultCode::NotFound);
}

#[test]
fn test_snapshot_is_independent_copy() {
    let store = populated(5);
    let mut snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 5);

    snapshot.insert("extra".to_string(), "x".to_string());
    assert_eq!(store.len(), 5);
    assert_eq!(store.get("extra").0, ResultCode::NotFound);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_readers() {
    let store = Arc::new(populated(100));
    let mut handles = Vec::new();

    for t in 0..8 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let key = format!("key{}", (i + t) % 100);
                let (code, value) = store.get(&key);
                assert_eq!(code, ResultCode::Ok);
                assert_eq!(value, format!("value{}", (i + t) % 100));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
