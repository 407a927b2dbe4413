//! Tests for log file records
//!
//! These tests verify:
//! - Delta and base files read back what was written
//! - File name parsing and directory listing order
//! - Corruption detection (checksum, truncation, kind mismatch)
//! - Epoch clock monotonicity

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use epochkv::persistence::{
    list_log_files, BaseFile, DeltaFile, EpochClock, LogFile, LogFileKind, FILE_HEADER_SIZE,
};
use epochkv::{KvError, WriteRecord};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_records() -> Vec<WriteRecord> {
    vec![
        WriteRecord::new("a", "1"),
        WriteRecord::new("b", "2"),
        WriteRecord::new("a", "3"),
    ]
}

fn log_file(path: &Path) -> LogFile {
    LogFile::parse(path).expect("valid log file name")
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_delta_file_preserves_record_order() {
    let temp = TempDir::new().unwrap();
    let delta = DeltaFile {
        epoch: 42,
        records: sample_records(),
    };

    let path = delta.write(temp.path()).unwrap();
    assert_eq!(path.file_name().unwrap(), "42-delta");

    let loaded = DeltaFile::read(&log_file(&path)).unwrap();
    assert_eq!(loaded, delta);
}

#[test]
fn test_base_file_round_trip() {
    let temp = TempDir::new().unwrap();
    let mut entries = HashMap::new();
    entries.insert("key1".to_string(), "value1".to_string());
    entries.insert("key2".to_string(), "ünïcödé".to_string());

    let base = BaseFile { epoch: 7, entries };
    let path = base.write(temp.path()).unwrap();
    assert_eq!(path.file_name().unwrap(), "7-base");

    let loaded = BaseFile::read(&log_file(&path)).unwrap();
    assert_eq!(loaded, base);
}

#[test]
fn test_empty_base_file() {
    let temp = TempDir::new().unwrap();
    let base = BaseFile {
        epoch: 1,
        entries: HashMap::new(),
    };
    let path = base.write(temp.path()).unwrap();

    let loaded = BaseFile::read(&log_file(&path)).unwrap();
    assert!(loaded.entries.is_empty());
}

#[test]
fn test_write_leaves_no_temp_file() {
    let temp = TempDir::new().unwrap();
    DeltaFile {
        epoch: 5,
        records: sample_records(),
    }
    .write(temp.path())
    .unwrap();

    let names: Vec<String> = fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["5-delta".to_string()]);
}

#[test]
fn test_write_into_missing_directory_is_persistence_error() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("gone");

    let result = DeltaFile {
        epoch: 1,
        records: sample_records(),
    }
    .write(&missing);

    assert!(matches!(result, Err(KvError::Persistence(_))));
}

// =============================================================================
// Naming and Listing Tests
// =============================================================================

#[test]
fn test_parse_file_names() {
    let base = LogFile::parse(Path::new("/logs/100-base")).unwrap();
    assert_eq!(base.epoch, 100);
    assert_eq!(base.kind, LogFileKind::Base);

    let delta = LogFile::parse(Path::new("200-delta")).unwrap();
    assert_eq!(delta.epoch, 200);
    assert_eq!(delta.kind, LogFileKind::Delta);

    assert!(LogFile::parse(Path::new("200-delta.tmp")).is_none());
    assert!(LogFile::parse(Path::new("abc-base")).is_none());
    assert!(LogFile::parse(Path::new("300-snapshot")).is_none());
    assert!(LogFile::parse(Path::new("README")).is_none());
}

#[test]
fn test_file_name_format() {
    assert_eq!(LogFile::file_name(9, LogFileKind::Base), "9-base");
    assert_eq!(LogFile::file_name(10, LogFileKind::Delta), "10-delta");
}

#[test]
fn test_listing_sorted_by_numeric_epoch() {
    let temp = TempDir::new().unwrap();
    for epoch in [100u64, 9, 1000, 20] {
        DeltaFile {
            epoch,
            records: sample_records(),
        }
        .write(temp.path())
        .unwrap();
    }
    BaseFile {
        epoch: 50,
        entries: HashMap::new(),
    }
    .write(temp.path())
    .unwrap();
    fs::write(temp.path().join("60-delta.tmp"), b"partial").unwrap();
    fs::write(temp.path().join("notes.txt"), b"ignored").unwrap();

    let files = list_log_files(temp.path()).unwrap();
    let epochs: Vec<u64> = files.iter().map(|f| f.epoch).collect();
    assert_eq!(epochs, vec![9, 20, 50, 100, 1000]);
    assert_eq!(files[2].kind, LogFileKind::Base);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_flipped_payload_byte_detected() {
    let temp = TempDir::new().unwrap();
    let path = DeltaFile {
        epoch: 3,
        records: sample_records(),
    }
    .write(temp.path())
    .unwrap();

    let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64 + 2)).unwrap();
    file.write_all(&[0xAB]).unwrap();
    drop(file);

    let result = DeltaFile::read(&log_file(&path));
    assert!(matches!(result, Err(KvError::Recovery(_))));
}

#[test]
fn test_truncated_file_detected() {
    let temp = TempDir::new().unwrap();
    let path = DeltaFile {
        epoch: 4,
        records: sample_records(),
    }
    .write(temp.path())
    .unwrap();

    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    assert!(matches!(
        DeltaFile::read(&log_file(&path)),
        Err(KvError::Recovery(_))
    ));
}

#[test]
fn test_garbage_file_detected() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("8-base");
    fs::write(&path, b"not a log file at all").unwrap();

    assert!(matches!(
        BaseFile::read(&log_file(&path)),
        Err(KvError::Recovery(_))
    ));
}

#[test]
fn test_kind_mismatch_detected() {
    let temp = TempDir::new().unwrap();
    let delta_path = DeltaFile {
        epoch: 11,
        records: sample_records(),
    }
    .write(temp.path())
    .unwrap();

    // A delta renamed to look like a base must not load as one
    let base_path = temp.path().join("11-base");
    fs::rename(&delta_path, &base_path).unwrap();

    assert!(matches!(
        BaseFile::read(&log_file(&base_path)),
        Err(KvError::Recovery(_))
    ));
}

// =============================================================================
// Epoch Clock Tests
// =============================================================================

#[test]
fn test_epochs_strictly_increase() {
    let clock = EpochClock::new();
    let mut last = 0;
    for _ in 0..10_000 {
        let epoch = clock.next();
        assert!(epoch > last);
        last = epoch;
    }
    assert_eq!(clock.last(), last);
}

#[test]
fn test_epochs_start_after_floor() {
    let floor = u64::MAX / 2;
    let clock = EpochClock::starting_after(floor);
    assert_eq!(clock.next(), floor + 1);
    assert_eq!(clock.next(), floor + 2);
}

#[test]
fn test_epochs_unique_across_threads() {
    use std::collections::HashSet;
    use std::sync::Arc;

    let clock = Arc::new(EpochClock::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || (0..1000).map(|_| clock.next()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for epoch in handle.join().unwrap() {
            assert!(seen.insert(epoch), "duplicate epoch {}", epoch);
        }
    }
    assert_eq!(seen.len(), 4000);
}
