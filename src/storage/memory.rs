//! In-memory storage backend.
//!
//! Thread-safe, non-durable. Intended for tests, previews and processes that
//! do not need preferences to outlive them.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::StorageError;
use crate::storage::traits::{apply_mutations, Mutation, PrefChange, PreferenceBackend};
use crate::value::PrefValue;

/// In-memory namespace backend.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, PrefValue>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceBackend for InMemoryBackend {
    fn get(&self, key: &str) -> Result<Option<PrefValue>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("memory.get"))?;
        Ok(entries.get(key).cloned())
    }

    fn entries(&self) -> Result<HashMap<String, PrefValue>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("memory.entries"))?;
        Ok(entries.clone())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("memory.keys"))?;
        Ok(entries.keys().cloned().collect())
    }

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StorageError::poisoned("memory.contains"))?;
        Ok(entries.contains_key(key))
    }

    fn apply(&self, batch: Vec<Mutation>) -> Result<Vec<PrefChange>, StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::poisoned("memory.apply"))?;
        Ok(apply_mutations(&mut entries, &batch))
    }
}
