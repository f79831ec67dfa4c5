//! Abstract backend contract for preference namespaces.
//!
//! A backend owns the entries of exactly one namespace. The store layer above
//! it adds typing, validation and change notification; the backend only has to
//! read entries and commit batches of mutations atomically.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::value::PrefValue;

/// A single requested change to a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Insert or replace the entry under `key`.
    Put { key: String, value: PrefValue },
    /// Delete the entry under `key`, whatever its kind.
    Remove { key: String },
    /// Delete every entry.
    Clear,
}

/// The committed effect of a batch on one key.
///
/// `old` is the value before the batch and `new` the value after it. A key
/// touched several times in one batch yields a single change.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefChange {
    pub key: String,
    pub old: Option<PrefValue>,
    pub new: Option<PrefValue>,
}

/// Storage contract for one namespace.
///
/// # Safety Considerations
/// - `apply` must be atomic: either every mutation in the batch is durable and
///   visible, or none is
/// - Implementations must be safe for concurrent use; writes are serialized
///   internally
pub trait PreferenceBackend: Send + Sync {
    /// Get the entry under `key`.
    fn get(&self, key: &str) -> Result<Option<PrefValue>, StorageError>;

    /// Copy of every entry.
    fn entries(&self) -> Result<HashMap<String, PrefValue>, StorageError>;

    /// All key names, unspecified order.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Whether any entry exists under `key`.
    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }

    /// Commit a batch atomically and report its per-key effects.
    fn apply(&self, batch: Vec<Mutation>) -> Result<Vec<PrefChange>, StorageError>;
}

/// Applies `batch` to `map` in order and collapses the effects per key.
pub(crate) fn apply_mutations(
    map: &mut HashMap<String, PrefValue>,
    batch: &[Mutation],
) -> Vec<PrefChange> {
    let mut changes = ChangeSet::default();
    for mutation in batch {
        match mutation {
            Mutation::Put { key, value } => {
                let old = map.insert(key.clone(), value.clone());
                changes.record(key, old, Some(value.clone()));
            }
            Mutation::Remove { key } => {
                let old = map.remove(key);
                changes.record(key, old, None);
            }
            Mutation::Clear => {
                for (key, old) in map.drain() {
                    changes.record(&key, Some(old), None);
                }
            }
        }
    }
    changes.into_vec()
}

#[derive(Default)]
struct ChangeSet {
    changes: Vec<PrefChange>,
    positions: HashMap<String, usize>,
}

impl ChangeSet {
    fn record(&mut self, key: &str, old: Option<PrefValue>, new: Option<PrefValue>) {
        if let Some(&pos) = self.positions.get(key) {
            self.changes[pos].new = new;
            return;
        }
        self.positions.insert(key.to_string(), self.changes.len());
        self.changes.push(PrefChange {
            key: key.to_string(),
            old,
            new,
        });
    }

    fn into_vec(self) -> Vec<PrefChange> {
        self.changes
    }
}
