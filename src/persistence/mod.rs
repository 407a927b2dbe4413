//! Persistence Module
//!
//! Durability through periodic delta flushes and base snapshots.
//!
//! ## Responsibilities
//! - Flush applied writes to `<epoch>-delta` files on a short interval
//! - Write full `<epoch>-base` snapshots on a long interval
//! - Delete files older than the newest base (retention)
//! - Rebuild the map from base + later deltas on startup
//!
//! ## Directory Layout
//! ```text
//! {log_dir}/
//!   ├── 1718000000000000000-base
//!   ├── 1718000000950000000-delta
//!   ├── 1718000001950000000-delta
//!   └── ...                      (*.tmp files are in-progress writes)
//! ```
//!
//! Epochs are unique across both families, so sorting by epoch gives the
//! order in which files were produced.

mod record;
mod manager;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

pub use record::{BaseFile, DeltaFile, WriteRecord, FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION};
pub use manager::{prune_before, PersistenceManager};
pub use recovery::{RecoveryManager, RecoveryReport};

/// Monotonically increasing file tag
pub type Epoch = u64;

// =============================================================================
// File Naming
// =============================================================================

/// The two families of log files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogFileKind {
    Base,
    Delta,
}

impl LogFileKind {
    fn suffix(self) -> &'static str {
        match self {
            LogFileKind::Base => "base",
            LogFileKind::Delta => "delta",
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            LogFileKind::Base => 1,
            LogFileKind::Delta => 2,
        }
    }
}

/// A persisted file identified by `<epoch>-<kind>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogFile {
    pub epoch: Epoch,
    pub kind: LogFileKind,
    pub path: PathBuf,
}

impl LogFile {
    /// File name for an epoch/kind pair
    pub fn file_name(epoch: Epoch, kind: LogFileKind) -> String {
        format!("{}-{}", epoch, kind.suffix())
    }

    /// Parse "<epoch>-base" / "<epoch>-delta"; anything else is ignored
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (epoch, suffix) = name.split_once('-')?;
        let kind = match suffix {
            "base" => LogFileKind::Base,
            "delta" => LogFileKind::Delta,
            _ => return None,
        };
        let epoch = epoch.parse().ok()?;
        Some(Self {
            epoch,
            kind,
            path: path.to_path_buf(),
        })
    }
}

/// List every log file in `dir`, ascending by epoch
pub fn list_log_files(dir: &Path) -> Result<Vec<LogFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(file) = LogFile::parse(&path) {
            files.push(file);
        }
    }

    files.sort();
    Ok(files)
}

// =============================================================================
// Epoch Clock
// =============================================================================

/// Hands out strictly increasing epochs
///
/// Epochs are wall-clock nanoseconds, bumped past the previous value when the
/// clock has not advanced (or went backwards).
#[derive(Debug, Default)]
pub struct EpochClock {
    last: AtomicU64,
}

impl EpochClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose next epoch is greater than `floor`
    pub fn starting_after(floor: Epoch) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Next unique epoch
    pub fn next(&self) -> Epoch {
        let now = unix_nanos();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(current) => last = current,
            }
        }
    }

    /// Most recently issued epoch
    pub fn last(&self) -> Epoch {
        self.last.load(Ordering::Acquire)
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
