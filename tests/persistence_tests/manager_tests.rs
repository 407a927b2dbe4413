//! Tests for the Persistence Manager
//!
//! These tests verify:
//! - Delta flush drains the queue in order and skips empty cycles
//! - Base snapshots capture the map and prune older files
//! - A failed delta write is retried on the next cycle
//! - Timer-driven cycles run without manual triggers

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use epochkv::persistence::{
    list_log_files, prune_before, BaseFile, DeltaFile, EpochClock, LogFileKind,
    PersistenceManager,
};
use epochkv::store::KeyStore;
use epochkv::WriteRecord;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup(dir: &Path, store: Arc<KeyStore>) -> (Sender<WriteRecord>, PersistenceManager) {
    let (tx, rx) = channel::bounded(1024);
    let manager = PersistenceManager::new(dir, store, rx, Arc::new(EpochClock::new()));
    (tx, manager)
}

fn kinds(dir: &Path) -> Vec<LogFileKind> {
    list_log_files(dir).unwrap().into_iter().map(|f| f.kind).collect()
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

// =============================================================================
// Delta Flush Tests
// =============================================================================

#[test]
fn test_empty_queue_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let (_tx, manager) = setup(temp.path(), Arc::new(KeyStore::new()));

    assert_eq!(manager.flush_delta().unwrap(), None);
    assert!(list_log_files(temp.path()).unwrap().is_empty());
}

#[test]
fn test_flush_drains_queue_in_order() {
    let temp = TempDir::new().unwrap();
    let (tx, manager) = setup(temp.path(), Arc::new(KeyStore::new()));

    for i in 0..10 {
        tx.send(WriteRecord::new(format!("k{}", i % 3), format!("v{}", i)))
            .unwrap();
    }

    let epoch = manager.flush_delta().unwrap().expect("delta written");
    let files = list_log_files(temp.path()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].epoch, epoch);

    let delta = DeltaFile::read(&files[0]).unwrap();
    let values: Vec<String> = delta.records.iter().map(|r| r.value.clone()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("v{}", i)).collect();
    assert_eq!(values, expected);
    assert_eq!(manager.records_flushed(), 10);

    // Queue is now empty
    assert_eq!(manager.flush_delta().unwrap(), None);
}

#[test]
fn test_successive_flushes_have_increasing_epochs() {
    let temp = TempDir::new().unwrap();
    let (tx, manager) = setup(temp.path(), Arc::new(KeyStore::new()));

    tx.send(WriteRecord::new("a", "1")).unwrap();
    let first = manager.flush_delta().unwrap().unwrap();
    tx.send(WriteRecord::new("a", "2")).unwrap();
    let second = manager.flush_delta().unwrap().unwrap();

    assert!(second > first);
    assert_eq!(kinds(temp.path()), vec![LogFileKind::Delta, LogFileKind::Delta]);
}

#[test]
fn test_failed_flush_is_retried_in_order() {
    let temp = TempDir::new().unwrap();
    let log_dir = temp.path().join("logs");
    fs::create_dir(&log_dir).unwrap();
    let (tx, manager) = setup(&log_dir, Arc::new(KeyStore::new()));

    tx.send(WriteRecord::new("a", "1")).unwrap();
    tx.send(WriteRecord::new("b", "2")).unwrap();

    // Directory disappears: the write fails, the batch is kept
    fs::remove_dir(&log_dir).unwrap();
    assert!(manager.flush_delta().is_err());
    assert_eq!(manager.pending_retry(), 2);

    fs::create_dir(&log_dir).unwrap();
    tx.send(WriteRecord::new("c", "3")).unwrap();
    manager.flush_delta().unwrap().expect("retried batch written");
    assert_eq!(manager.pending_retry(), 0);

    let files = list_log_files(&log_dir).unwrap();
    assert_eq!(files.len(), 1);
    let keys: Vec<String> = DeltaFile::read(&files[0])
        .unwrap()
        .records
        .into_iter()
        .map(|r| r.key)
        .collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

// =============================================================================
// Base Snapshot Tests
// =============================================================================

#[test]
fn test_snapshot_captures_store() {
    let temp = TempDir::new().unwrap();
    let mut map = HashMap::new();
    map.insert("x".to_string(), "1".to_string());
    map.insert("y".to_string(), "2".to_string());
    let store = Arc::new(KeyStore::from_map(map.clone()));
    let (_tx, manager) = setup(temp.path(), store);

    let epoch = manager.snapshot_base().unwrap();
    manager.wait_for_retention();

    let files = list_log_files(temp.path()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].kind, LogFileKind::Base);
    assert_eq!(files[0].epoch, epoch);
    assert_eq!(BaseFile::read(&files[0]).unwrap().entries, map);
}

#[test]
fn test_snapshot_prunes_older_files() {
    let temp = TempDir::new().unwrap();
    let (tx, manager) = setup(temp.path(), Arc::new(KeyStore::new()));

    tx.send(WriteRecord::new("a", "1")).unwrap();
    manager.flush_delta().unwrap();
    manager.snapshot_base().unwrap();
    manager.wait_for_retention();
    tx.send(WriteRecord::new("b", "2")).unwrap();
    manager.flush_delta().unwrap();

    assert_eq!(kinds(temp.path()), vec![LogFileKind::Base, LogFileKind::Delta]);

    let newest = manager.snapshot_base().unwrap();
    manager.wait_for_retention();

    let files = list_log_files(temp.path()).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].epoch, newest);
    assert_eq!(files[0].kind, LogFileKind::Base);
}

#[test]
fn test_prune_before_keeps_cutoff_and_newer() {
    let temp = TempDir::new().unwrap();
    for epoch in [10u64, 20, 30] {
        DeltaFile {
            epoch,
            records: vec![WriteRecord::new("k", "v")],
        }
        .write(temp.path())
        .unwrap();
    }
    BaseFile {
        epoch: 25,
        entries: HashMap::new(),
    }
    .write(temp.path())
    .unwrap();

    let removed = prune_before(temp.path(), 25).unwrap();
    assert_eq!(removed, 2);

    let epochs: Vec<u64> = list_log_files(temp.path())
        .unwrap()
        .iter()
        .map(|f| f.epoch)
        .collect();
    assert_eq!(epochs, vec![25, 30]);
}

// =============================================================================
// Timer Tests
// =============================================================================

#[test]
fn test_timers_flush_without_manual_trigger() {
    let temp = TempDir::new().unwrap();
    let (tx, mut manager) = setup(temp.path(), Arc::new(KeyStore::new()));
    manager
        .start(Duration::from_millis(20), Duration::from_secs(3600))
        .unwrap();

    tx.send(WriteRecord::new("a", "1")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        kinds(temp.path()).contains(&LogFileKind::Delta)
    }));

    manager.shutdown().unwrap();
}

#[test]
fn test_base_timer_writes_snapshot() {
    let temp = TempDir::new().unwrap();
    let (_tx, mut manager) = setup(temp.path(), Arc::new(KeyStore::new()));
    manager
        .start(Duration::from_secs(3600), Duration::from_millis(20))
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        kinds(temp.path()).contains(&LogFileKind::Base)
    }));

    manager.shutdown().unwrap();
}

#[test]
fn test_shutdown_flushes_remaining_records() {
    let temp = TempDir::new().unwrap();
    let (tx, mut manager) = setup(temp.path(), Arc::new(KeyStore::new()));
    manager
        .start(Duration::from_secs(3600), Duration::from_secs(3600))
        .unwrap();

    tx.send(WriteRecord::new("late", "write")).unwrap();
    drop(tx);
    manager.shutdown().unwrap();

    let files = list_log_files(temp.path()).unwrap();
    assert_eq!(files.len(), 1);
    let delta = DeltaFile::read(&files[0]).unwrap();
    assert_eq!(delta.records, vec![WriteRecord::new("late", "write")]);
}

#[test]
fn test_start_twice_is_rejected() {
    let temp = TempDir::new().unwrap();
    let (_tx, mut manager) = setup(temp.path(), Arc::new(KeyStore::new()));
    manager
        .start(Duration::from_secs(1), Duration::from_secs(1))
        .unwrap();
    assert!(manager
        .start(Duration::from_secs(1), Duration::from_secs(1))
        .is_err());
    manager.shutdown().unwrap();
}
