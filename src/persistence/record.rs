//! Log file records
//!
//! The write record replayed on recovery and the on-disk format of base and
//! delta files.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (19 bytes)                                            │
//! │   Magic "EPKV" (4) | Version u16 (2) | Kind u8 (1)           │
//! │   PayloadLen u64 (8) | PayloadCRC u32 (4)                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (bincode)                                            │
//! │   base:  HashMap<String, String>                             │
//! │   delta: Vec<WriteRecord> in apply order                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! All integers are little-endian. Files are written to `<name>.tmp`, synced,
//! then renamed into place, so a visible log file is always complete.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KvError, Result};
use super::{Epoch, LogFile, LogFileKind};

/// Magic bytes identifying an EpochKV log file
pub const FILE_MAGIC: &[u8; 4] = b"EPKV";

/// Current log file format version
pub const FILE_VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Kind (1) + Len (8) + CRC (4)
pub const FILE_HEADER_SIZE: usize = 19;

/// A single applied write, the unit persisted and replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRecord {
    pub key: String,
    pub value: String,
}

impl WriteRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Writes captured between two delta flushes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFile {
    pub epoch: Epoch,
    pub records: Vec<WriteRecord>,
}

impl DeltaFile {
    /// Persist as `<epoch>-delta` in `dir`
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let payload = bincode::serialize(&self.records)?;
        write_log_file(dir, self.epoch, LogFileKind::Delta, &payload)
    }

    /// Load and verify a delta file
    pub fn read(file: &LogFile) -> Result<Self> {
        let payload = read_log_file(&file.path, LogFileKind::Delta)?;
        let records = bincode::deserialize(&payload).map_err(|e| {
            KvError::Recovery(format!("{}: bad delta payload: {}", file.path.display(), e))
        })?;
        Ok(Self {
            epoch: file.epoch,
            records,
        })
    }
}

/// Full snapshot of the map at an epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseFile {
    pub epoch: Epoch,
    pub entries: HashMap<String, String>,
}

impl BaseFile {
    /// Persist as `<epoch>-base` in `dir`
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let payload = bincode::serialize(&self.entries)?;
        write_log_file(dir, self.epoch, LogFileKind::Base, &payload)
    }

    /// Load and verify a base file
    pub fn read(file: &LogFile) -> Result<Self> {
        let payload = read_log_file(&file.path, LogFileKind::Base)?;
        let entries = bincode::deserialize(&payload).map_err(|e| {
            KvError::Recovery(format!("{}: bad base payload: {}", file.path.display(), e))
        })?;
        Ok(Self {
            epoch: file.epoch,
            entries,
        })
    }
}

// =============================================================================
// Raw file I/O
// =============================================================================

fn write_log_file(dir: &Path, epoch: Epoch, kind: LogFileKind, payload: &[u8]) -> Result<PathBuf> {
    let name = LogFile::file_name(epoch, kind);
    let path = dir.join(&name);
    let tmp_path = dir.join(format!("{}.tmp", name));

    if let Err(e) = write_and_sync(&tmp_path, kind, payload) {
        let _ = fs::remove_file(&tmp_path);
        return Err(KvError::Persistence(format!(
            "{}: {}",
            tmp_path.display(),
            e
        )));
    }

    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        KvError::Persistence(format!("{}: rename failed: {}", path.display(), e))
    })?;

    Ok(path)
}

fn write_and_sync(path: &Path, kind: LogFileKind, payload: &[u8]) -> Result<()> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(FILE_MAGIC)?;
    writer.write_all(&FILE_VERSION.to_le_bytes())?;
    writer.write_all(&[kind.tag()])?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(&crc.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;

    let file = writer
        .into_inner()
        .map_err(|e| KvError::Persistence(format!("Failed to flush log file: {}", e)))?;
    file.sync_all()?;
    Ok(())
}

fn read_log_file(path: &Path, kind: LogFileKind) -> Result<Vec<u8>> {
    let bytes = fs::read(path)
        .map_err(|e| KvError::Recovery(format!("{}: {}", path.display(), e)))?;
    let corrupt = |what: &str| KvError::Recovery(format!("{}: {}", path.display(), what));

    if bytes.len() < FILE_HEADER_SIZE {
        return Err(corrupt("truncated header"));
    }
    if &bytes[0..4] != FILE_MAGIC {
        return Err(corrupt("bad magic"));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FILE_VERSION {
        return Err(corrupt(&format!("unsupported version {}", version)));
    }
    if bytes[6] != kind.tag() {
        return Err(corrupt("file kind does not match its name"));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[7..15]);
    let payload_len = u64::from_le_bytes(len_bytes) as usize;
    let expected_crc = u32::from_le_bytes([bytes[15], bytes[16], bytes[17], bytes[18]]);

    let payload = &bytes[FILE_HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(corrupt(&format!(
            "payload length {} does not match header {}",
            payload.len(),
            payload_len
        )));
    }
    if crc32fast::hash(payload) != expected_crc {
        return Err(corrupt("checksum mismatch"));
    }

    Ok(payload.to_vec())
}
