//! Recovery
//!
//! Rebuilds the map at startup from the newest readable base snapshot plus
//! every later delta, replayed in ascending epoch order.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use super::{list_log_files, BaseFile, DeltaFile, Epoch, LogFile, LogFileKind};

/// Startup-only reconstruction of the map
pub struct RecoveryManager;

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Epoch of the base snapshot used, if any
    pub base_epoch: Option<Epoch>,

    /// Number of delta files replayed
    pub deltas_replayed: u64,

    /// Number of write records applied from deltas
    pub records_replayed: u64,

    /// Number of files skipped as unreadable or corrupt
    pub files_skipped: u64,

    /// Highest epoch found on disk (0 when the directory is empty)
    pub max_epoch: Epoch,
}

impl RecoveryManager {
    /// Recover the map stored in `log_dir`
    ///
    /// A missing directory yields an empty map. Individual unreadable files
    /// are logged and skipped; only failing to list the directory is an error.
    ///
    /// This will:
    /// 1. List `<epoch>-base` / `<epoch>-delta` files, ascending by epoch
    /// 2. Load the newest base that reads cleanly (older bases are fallbacks)
    /// 3. Replay deltas newer than that base, in epoch order
    pub fn recover(log_dir: &Path) -> Result<(HashMap<String, String>, RecoveryReport)> {
        let mut report = RecoveryReport::default();

        if !log_dir.exists() {
            tracing::info!("No log directory at {}; starting empty", log_dir.display());
            return Ok((HashMap::new(), report));
        }

        let files = list_log_files(log_dir)?;
        report.max_epoch = files.last().map(|f| f.epoch).unwrap_or(0);

        let (mut map, base_epoch) = Self::load_newest_base(&files, &mut report);
        report.base_epoch = base_epoch;

        let deltas = files.iter().filter(|f| {
            f.kind == LogFileKind::Delta && base_epoch.map_or(true, |base| f.epoch > base)
        });

        for file in deltas {
            match DeltaFile::read(file) {
                Ok(delta) => {
                    report.records_replayed += delta.records.len() as u64;
                    report.deltas_replayed += 1;
                    for record in delta.records {
                        map.insert(record.key, record.value);
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping delta {}: {}", file.path.display(), e);
                    report.files_skipped += 1;
                }
            }
        }

        tracing::info!(
            "Recovered {} keys (base={:?}, deltas={}, records={}, skipped={})",
            map.len(),
            report.base_epoch,
            report.deltas_replayed,
            report.records_replayed,
            report.files_skipped
        );

        Ok((map, report))
    }

    fn load_newest_base(
        files: &[LogFile],
        report: &mut RecoveryReport,
    ) -> (HashMap<String, String>, Option<Epoch>) {
        let bases = files
            .iter()
            .rev()
            .filter(|f| f.kind == LogFileKind::Base);

        for file in bases {
            match BaseFile::read(file) {
                Ok(base) => return (base.entries, Some(base.epoch)),
                Err(e) => {
                    tracing::warn!("Skipping base {}: {}", file.path.display(), e);
                    report.files_skipped += 1;
                }
            }
        }

        (HashMap::new(), None)
    }
}
