//! Write-ahead log for preference commits.
//!
//! Every committed batch is appended (and optionally fsynced) before it is
//! applied in memory. On open the log is replayed on top of the latest
//! snapshot.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: codec-framed WalEntry]
//! [RECORD 2: codec-framed WalEntry]
//! ...
//! ```
//!
//! A crash mid-append leaves a torn final record. Opening the log cuts the
//! file back to the end of the last intact record so later appends are never
//! hidden behind garbage.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::traits::Mutation;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number, never reused across
    /// compactions.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// What was committed.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// One atomic batch of mutations.
    Commit(Vec<Mutation>),
    /// Everything up to this sequence is contained in the snapshot.
    Checkpoint { up_to_sequence: u64 },
}

struct WalState {
    // Opened in append mode; each record goes out in a single write.
    file: File,
    sequence: u64,
    // Set when a partial record could not be cut off.
    broken: bool,
}

/// Append-only log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

/// Outcome of scanning an existing log on open.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalScan {
    /// Number of intact entries.
    pub entries: u64,
    /// Highest intact sequence number (0 if none).
    pub last_sequence: u64,
    /// Bytes cut from a torn or corrupted tail.
    pub truncated_bytes: u64,
}

impl WriteAheadLog {
    /// Open or create a log file.
    ///
    /// `min_sequence` is the sequence already covered by the snapshot; new
    /// entries are numbered after `max(min_sequence, last intact sequence)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, read, or repaired, or
    /// if an existing file does not start with a valid header.
    pub fn open(path: &Path, sync_on_write: bool, min_sequence: u64) -> IoResult<(Self, WalScan)> {
        let exists = path.exists() && std::fs::metadata(path)?.len() >= codec::HEADER_LEN;

        let scan = if exists {
            Self::repair(path)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            WalScan::default()
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let wal = Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                file,
                sequence: scan.last_sequence.max(min_sequence),
                broken: false,
            }),
            sync_on_write,
        };
        Ok((wal, scan))
    }

    /// Scan the log and cut any torn tail.
    fn repair(path: &Path) -> IoResult<WalScan> {
        let mut scan = WalScan::default();
        let mut iter = WalIterator::new(path)?;
        let file_size = iter.file_size;

        for result in iter.by_ref() {
            match result {
                Ok(entry) => {
                    scan.entries += 1;
                    scan.last_sequence = entry.sequence;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        after_sequence = scan.last_sequence,
                        error = %e,
                        "WAL tail is torn or corrupted; truncating"
                    );
                    break;
                }
            }
        }

        let valid_len = iter.valid_offset;
        if valid_len < file_size {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            scan.truncated_bytes = file_size - valid_len;
        }
        Ok(scan)
    }

    /// Append an entry and return its sequence number.
    ///
    /// A failed append leaves the file exactly as long as it was before the
    /// call and does not consume a sequence number.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be encoded, written, or synced.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned lock: wal.append"))?;
        if state.broken {
            return Err(std::io::Error::new(
                ErrorKind::Other,
                "WAL holds a partial record; reopen to repair",
            ));
        }

        let candidate = state.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        let start = state.file.metadata()?.len();
        if let Err(e) = self.write_record(&mut state.file, &encoded) {
            if !discard_tail(&state.file, start, &self.path) {
                state.broken = true;
            }
            return Err(e);
        }

        state.sequence = candidate;
        Ok(candidate)
    }

    fn write_record(&self, file: &mut File, encoded: &[u8]) -> IoResult<()> {
        file.write_all(encoded)?;
        if self.sync_on_write {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Iterate over all intact entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its header is invalid.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Highest sequence number assigned so far.
    pub fn current_sequence(&self) -> u64 {
        self.state.lock().map_or(0, |s| s.sequence)
    }

    /// Log file size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file metadata cannot be read.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drop every entry, keeping only the header.
    ///
    /// Only call after a snapshot covering `current_sequence()` is durable.
    /// The sequence counter is preserved so later entries sort after the
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be rewritten or reopened.
    pub fn truncate(&self) -> IoResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "poisoned lock: wal.truncate"))?;

        let mut file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        state.broken = false;
        codec::write_header(&mut file)?;
        if self.sync_on_write {
            file.sync_all()?;
        }
        drop(file);

        // Append handles opened before the truncate still write at EOF.
        state.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }
}

/// Cut off whatever part of a failed record reached the file.
///
/// Returns `false` if the file could not be shrunk. Later records would then
/// sit behind the partial one and be dropped as a torn tail on reopen.
fn discard_tail(file: &File, len: u64, path: &Path) -> bool {
    match file.set_len(len) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                len,
                error = %e,
                "failed to discard partial WAL record"
            );
            false
        }
    }
}

/// Iterator over WAL entries. Stops at end of file or a torn final record.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    valid_offset: u64,
    failed: bool,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;

        Ok(Self {
            reader,
            file_size,
            valid_offset: codec::HEADER_LEN,
            failed: false,
        })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.valid_offset >= self.file_size {
            return None;
        }

        match codec::decode::<WalEntry>(&mut self.reader) {
            Ok(entry) => match self.reader.stream_position() {
                Ok(pos) => {
                    self.valid_offset = pos;
                    Some(Ok(entry))
                }
                Err(e) => {
                    self.failed = true;
                    Some(Err(e))
                }
            },
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
