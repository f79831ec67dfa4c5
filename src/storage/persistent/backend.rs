//! Durable namespace backend: snapshot + WAL replay into an in-memory map.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::StorageError;
use crate::storage::traits::{apply_mutations, Mutation, PrefChange, PreferenceBackend};
use crate::value::PrefValue;

use super::codec;
use super::file_lock::FileLock;
use super::snapshot::{self, SnapshotData, SnapshotWriter};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "prefs.wal";
const SNAPSHOT_FILE: &str = "prefs.snap";

/// Result of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Entries written to the snapshot (0 if nothing was compacted).
    pub entries_compacted: u64,
    /// WAL sequence the snapshot covers, if one was written.
    pub snapshot_sequence: Option<u64>,
    /// WAL size before compaction.
    pub wal_size_before: u64,
    /// WAL size after compaction.
    pub wal_size_after: u64,
}

/// A namespace stored on disk.
///
/// Reads are served from memory. Each `apply` appends one WAL record before
/// touching memory, so a failed append leaves the namespace unchanged.
pub struct PersistentBackend {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    snapshot_path: PathBuf,
    config: PersistentConfig,
    entries: RwLock<HashMap<String, PrefValue>>,
}

impl std::fmt::Debug for PersistentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentBackend")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentBackend {
    /// Open or create the namespace directory `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created, another
    /// process holds its lock, or the WAL cannot be opened. Returns
    /// [`StorageError::Corrupted`] if the snapshot or a replayed WAL entry is
    /// unreadable.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| StorageError::io("create namespace directory", e))?;
        let lock = FileLock::acquire(dir).map_err(|e| StorageError::io("acquire lock", e))?;

        let stale = snapshot::remove_stale_temp_files(dir)
            .map_err(|e| StorageError::io("scan namespace directory", e))?;
        if stale > 0 {
            tracing::debug!(dir = %dir.display(), stale, "removed interrupted snapshot files");
        }

        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let (snapshot_sequence, mut entries) = match snapshot::read(&snapshot_path) {
            Ok(Some((header, data))) => (header.sequence_end, data.entries.into_iter().collect()),
            Ok(None) => (0, HashMap::new()),
            Err(e) => {
                return Err(StorageError::Corrupted(format!(
                    "unreadable snapshot {}: {e}",
                    snapshot_path.display()
                )))
            }
        };

        let (wal, scan) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write, snapshot_sequence)
            .map_err(|e| StorageError::io("open WAL", e))?;

        let mut replayed = 0u64;
        for entry in wal.iter().map_err(|e| StorageError::io("iterate WAL", e))? {
            let entry = entry.map_err(|e| StorageError::Corrupted(format!("WAL entry: {e}")))?;
            if entry.sequence <= snapshot_sequence {
                continue;
            }
            if let WalEntryKind::Commit(batch) = entry.kind {
                apply_mutations(&mut entries, &batch);
                replayed += 1;
            }
        }

        if replayed > 0 || scan.truncated_bytes > 0 {
            tracing::info!(
                dir = %dir.display(),
                replayed,
                truncated_bytes = scan.truncated_bytes,
                "recovered namespace from WAL"
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            snapshot_path,
            config,
            entries: RwLock::new(entries),
        })
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    /// Write a snapshot of the current entries and truncate the WAL.
    ///
    /// Safe at any time: if it fails partway, the WAL still holds every
    /// commit and is replayed on the next open.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the snapshot cannot be written or the
    /// WAL cannot be checkpointed and truncated.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let entries = self
            .entries
            .write()
            .map_err(|_| StorageError::poisoned("persistent.compact"))?;
        self.compact_locked(&entries)
    }

    fn compact_locked(
        &self,
        entries: &HashMap<String, PrefValue>,
    ) -> Result<CompactionResult, StorageError> {
        let wal_size_before = self.wal_size();
        if wal_size_before <= codec::HEADER_LEN {
            return Ok(CompactionResult {
                entries_compacted: 0,
                snapshot_sequence: None,
                wal_size_before,
                wal_size_after: wal_size_before,
            });
        }

        let sequence = self.wal.current_sequence();
        let data = SnapshotData {
            entries: entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let header = SnapshotWriter::new(&self.snapshot_path)
            .write(&data, sequence)
            .map_err(|e| StorageError::io("write snapshot", e))?;

        self.wal
            .append(WalEntryKind::Checkpoint {
                up_to_sequence: sequence,
            })
            .map_err(|e| StorageError::io("write checkpoint", e))?;
        self.wal
            .truncate()
            .map_err(|e| StorageError::io("truncate WAL", e))?;

        let wal_size_after = self.wal_size();
        tracing::info!(
            dir = %self.dir.display(),
            entries = header.entry_count,
            sequence,
            wal_size_before,
            wal_size_after,
            "compacted namespace"
        );

        Ok(CompactionResult {
            entries_compacted: header.entry_count,
            snapshot_sequence: Some(sequence),
            wal_size_before,
            wal_size_after,
        })
    }
}

impl PreferenceBackend for PersistentBackend {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("persistent.get"))?;
        Ok(entries.get(key).cloned())
    }

    fn entries(&self) -> Result<HashMap<String, PrefValue>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("persistent.entries"))?;
        Ok(entries.clone())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("persistent.keys"))?;
        Ok(entries.keys().cloned().collect())
    }

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("persistent.contains"))?;
        Ok(entries.contains_key(key))
    }

    fn apply(&self, batch: Vec<Mutation>) -> Result<Vec<PrefChange>, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::poisoned("persistent.apply"))?;

        let sequence = self
            .wal
            .append(WalEntryKind::Commit(batch.clone()))
            .map_err(|e| StorageError::io("WAL append", e))?;
        let changes = apply_mutations(&mut entries, &batch);
        tracing::debug!(dir = %self.dir.display(), sequence, mutations = batch.len(), "committed batch");

        if self.wal_size() > self.config.max_wal_size {
            // The batch is already durable in the WAL; a failed compaction is retried on
            // the next commit.
            if let Err(e) = self.compact_locked(&entries) {
                tracing::warn!(dir = %self.dir.display(), error = %e, "automatic compaction failed");
            }
        }

        Ok(changes)
    }
}
