//! Compacted namespace snapshots.
//!
//! A snapshot holds every entry of a namespace as of one WAL sequence.
//! Snapshots are written to a temp file, fsynced, then renamed over
//! `prefs.snap`, so a reader only ever sees a complete snapshot or the
//! previous one.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [codec-framed SnapshotHeader]
//! [codec-framed SnapshotData]
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::PrefValue;

use super::codec;

/// Snapshot file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Last WAL sequence whose effects are included.
    pub sequence_end: u64,
    /// Number of entries in the snapshot.
    pub entry_count: u64,
    /// When the snapshot was written.
    pub created_at: DateTime<Utc>,
}

/// Entries stored in a snapshot. Ordered so snapshots are byte-stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    pub entries: BTreeMap<String, PrefValue>,
}

/// Reads a snapshot. Returns `Ok(None)` if none has been written yet.
pub fn read(path: &Path) -> IoResult<Option<(SnapshotHeader, SnapshotData)>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);

    codec::read_header(&mut reader)?;
    let header: SnapshotHeader = codec::decode(&mut reader)?;
    let data: SnapshotData = codec::decode(&mut reader)?;

    if data.entries.len() as u64 != header.entry_count {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "snapshot entry count mismatch: header={} actual={}",
                header.entry_count,
                data.entries.len()
            ),
        ));
    }
    Ok(Some((header, data)))
}

/// Writes a snapshot file atomically (temp file, fsync, rename).
pub struct SnapshotWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
}

impl SnapshotWriter {
    #[must_use]
    pub fn new(final_path: &Path) -> Self {
        Self {
            temp_path: None,
            final_path: final_path.to_path_buf(),
        }
    }

    /// Write `data` as of `sequence_end` and commit it.
    ///
    /// This is the commit point: once it returns, the new snapshot is
    /// durable and replaces the old one.
    pub fn write(mut self, data: &SnapshotData, sequence_end: u64) -> IoResult<SnapshotHeader> {
        let temp_path = self
            .final_path
            .with_extension(format!("snap.tmp.{}", Uuid::new_v4()));
        self.temp_path = Some(temp_path.clone());

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);

        let header = SnapshotHeader {
            sequence_end,
            entry_count: data.entries.len() as u64,
            created_at: Utc::now(),
        };
        codec::write_header(&mut writer)?;
        writer.write_all(&codec::encode(&header)?)?;
        writer.write_all(&codec::encode(data)?)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp_path, &self.final_path)?;
        self.temp_path = None;
        sync_parent_dir(&self.final_path);
        Ok(header)
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        // Best-effort cleanup if the write did not reach the rename.
        if let Some(ref temp_path) = self.temp_path {
            let _ = fs::remove_file(temp_path);
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Remove temp files left behind by an interrupted snapshot write.
pub fn remove_stale_temp_files(dir: &Path) -> IoResult<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(".snap.tmp."));
        if is_temp && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}
