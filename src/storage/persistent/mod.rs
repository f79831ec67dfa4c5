//! Persistent storage backend for preference namespaces.
//!
//! Each namespace lives in its own directory:
//! - `.lock`: exclusive file lock for single-process access
//! - `prefs.wal`: write-ahead log of committed batches (CRC32-framed)
//! - `prefs.snap`: compacted snapshot, replaced atomically
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     PersistentBackend                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌──────────────┐  │
//! │  │ WriteAheadLog   │  │ Snapshot        │  │ HashMap      │  │
//! │  │ (append-only)   │  │ (temp + rename) │  │ (reads)      │  │
//! │  └────────┬────────┘  └────────┬────────┘  └──────────────┘  │
//! │           └──────────┬─────────┘                             │
//! │                      ↓                                       │
//! │           ┌─────────────────────┐                            │
//! │           │   FileLock (flock)  │                            │
//! │           └─────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod backend;
mod codec;
mod file_lock;
mod snapshot;
mod wal;

pub use backend::{CompactionResult, PersistentBackend};
pub use file_lock::FileLock;
pub use wal::{WalEntry, WalEntryKind, WalIterator, WalScan, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PrefError, ValidationError};

/// Configuration for persistent namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size (bytes) above which a commit triggers compaction.
    pub max_wal_size: u64,
    /// Whether to fsync after every commit (slower but survives power loss).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MiB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // 4 KiB minimum to avoid compacting on every write

    /// Check limits.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent namespace at `path`.
///
/// # Errors
/// - If the config is invalid
/// - If the directory cannot be created or accessed
/// - If another process holds the namespace lock
/// - If the snapshot is unreadable
///
/// # Example
/// ```rust,no_run
/// use prefstore::storage::{open_namespace, PreferenceBackend};
///
/// let backend = open_namespace("./prefs/app_datastore_settings", None)?;
/// let keys = backend.keys()?;
/// # Ok::<(), prefstore::PrefError>(())
/// ```
pub fn open_namespace(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentBackend, PrefError> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentBackend::open(path.as_ref(), cfg)?)
}
