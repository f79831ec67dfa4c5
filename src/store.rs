//! Typed facade over one preference namespace.
//!
//! `KeyedPreferenceStore` validates requests, turns them into backend
//! mutations, and publishes every committed change to the namespace's watch
//! hub. It never caches values itself: reads go straight to the backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PrefError, PrefResult, StorageError, ValidationError};
use crate::key::{validate_key, KeyRef};
use crate::namespace::NamespaceId;
use crate::storage::{InMemoryBackend, Mutation, PrefChange, PreferenceBackend};
use crate::value::{PrefKind, PrefValue, Preference};
use crate::watch::{ChangeStream, PrefStream, WatchConfig, WatchHub};

/// Typed key-value operations over one namespace.
///
/// Obtain one through [`PreferenceRegistry::store`] so that every caller of a
/// namespace shares the same handle (and the same subscribers), or build one
/// directly around a backend.
///
/// # Example
/// ```
/// use prefstore::{KeyedPreferenceStore, NamespaceId, PrefKey};
///
/// const THEME: PrefKey<String> = PrefKey::new("theme");
///
/// let ns = NamespaceId::new("app", "datastore", "settings")?;
/// let store = KeyedPreferenceStore::in_memory(ns);
///
/// store.save(THEME, "dark".to_string())?;
/// assert_eq!(store.get(THEME, String::new())?, "dark");
/// assert_eq!(store.get("missing", 7)?, 7);
/// # Ok::<(), prefstore::PrefError>(())
/// ```
///
/// [`PreferenceRegistry::store`]: crate::PreferenceRegistry::store
pub struct KeyedPreferenceStore {
    namespace: NamespaceId,
    backend: Arc<dyn PreferenceBackend>,
    hub: Arc<WatchHub>,
    // Orders publishes the same way as commits.
    commit_lock: Mutex<()>,
}

impl std::fmt::Debug for KeyedPreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedPreferenceStore")
            .field("namespace", &self.namespace)
            .field("subscribers", &self.hub.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl KeyedPreferenceStore {
    /// Create a store over `backend`.
    #[must_use]
    pub fn new(
        namespace: NamespaceId,
        backend: Arc<dyn PreferenceBackend>,
        watch: &WatchConfig,
    ) -> Self {
        tracing::debug!(namespace = %namespace, "preference store opened");
        Self {
            namespace,
            backend,
            hub: WatchHub::new(watch),
            commit_lock: Mutex::new(()),
        }
    }

    /// Create a store backed by a fresh [`InMemoryBackend`].
    #[must_use]
    pub fn in_memory(namespace: NamespaceId) -> Self {
        Self::new(
            namespace,
            Arc::new(InMemoryBackend::new()),
            &WatchConfig::default(),
        )
    }

    /// The namespace this store serves.
    #[must_use]
    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    /// Insert or replace the value under `key`.
    ///
    /// An existing entry of a different kind is replaced.
    ///
    /// # Errors
    /// - `Validation` for an empty key or a NaN/infinite float
    /// - `Storage` if the backend commit fails
    pub fn save<T: Preference>(&self, key: impl KeyRef<T>, value: T) -> PrefResult<()> {
        let mutation = put_mutation(key.key_name(), value.into_value())?;
        self.commit(vec![mutation])
    }

    /// The value under `key` if present and of kind `T`, else `default`.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn get<T: Preference>(&self, key: impl KeyRef<T>, default: T) -> PrefResult<T> {
        Ok(self.get_opt(key)?.unwrap_or(default))
    }

    /// The value under `key` if present and of kind `T`.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn get_opt<T: Preference>(&self, key: impl KeyRef<T>) -> PrefResult<Option<T>> {
        let value = self.backend.get(key.key_name())?;
        Ok(value.as_ref().and_then(T::from_value))
    }

    /// The raw value under `key`, whatever its kind.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn get_value(&self, key: &str) -> PrefResult<Option<PrefValue>> {
        Ok(self.backend.get(key)?)
    }

    /// The kind of the entry under `key`, if any.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn kind_of(&self, key: &str) -> PrefResult<Option<PrefKind>> {
        Ok(self.backend.get(key)?.map(|v| v.kind()))
    }

    /// Delete the entry under `key`, whatever its kind.
    ///
    /// Returns whether an entry was removed.
    ///
    /// # Errors
    /// - `Validation` for an empty key
    /// - `Storage` if the backend commit fails
    pub fn remove(&self, key: &str) -> PrefResult<bool> {
        validate_key(key)?;
        let changes = self.commit_changes(vec![Mutation::Remove {
            key: key.to_string(),
        }])?;
        Ok(changes.iter().any(|c| c.old.is_some()))
    }

    /// Delete every entry in the namespace.
    ///
    /// # Errors
    /// `Storage` if the backend commit fails.
    pub fn clear(&self) -> PrefResult<()> {
        self.commit(vec![Mutation::Clear])
    }

    /// Whether any entry exists under `key`.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn contains(&self, key: &str) -> PrefResult<bool> {
        Ok(self.backend.contains(key)?)
    }

    /// Whether an entry of kind `T` exists under `key`.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn contains_key<T: Preference>(&self, key: impl KeyRef<T>) -> PrefResult<bool> {
        Ok(self.kind_of(key.key_name())? == Some(T::KIND))
    }

    /// All stored key names, unspecified order.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn list_keys(&self) -> PrefResult<Vec<String>> {
        Ok(self.backend.keys()?)
    }

    /// Copy of every entry.
    ///
    /// # Errors
    /// `Storage` if the backend cannot be read.
    pub fn snapshot(&self) -> PrefResult<HashMap<String, PrefValue>> {
        Ok(self.backend.entries()?)
    }

    /// Serialize `value` to JSON and store it as a string.
    ///
    /// # Errors
    /// - `Serialization` if `value` cannot be encoded
    /// - `Validation` or `Storage` as for [`save`](Self::save)
    pub fn save_json<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> PrefResult<()> {
        let encoded = serde_json::to_string(value)?;
        self.save(key, encoded)
    }

    /// Decode the JSON string stored under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent, holds a non-string value, or
    /// holds an empty string.
    ///
    /// # Errors
    /// - `Serialization` if the stored string is not valid JSON for `V`
    /// - `Storage` if the backend cannot be read
    pub fn get_json<V: DeserializeOwned>(&self, key: &str) -> PrefResult<Option<V>> {
        match self.get_opt::<String>(key)? {
            Some(raw) if !raw.is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
            _ => Ok(None),
        }
    }

    /// Apply several changes as one atomic commit.
    ///
    /// Subscribers see each touched key once, with its final value. Nothing is
    /// written if the closure records an invalid change.
    ///
    /// ```
    /// use prefstore::{KeyedPreferenceStore, NamespaceId};
    ///
    /// let store = KeyedPreferenceStore::in_memory(NamespaceId::new("app", "datastore", "ui")?);
    /// store.edit(|e| {
    ///     e.put("width", 800).put("height", 600).remove("legacy_size");
    /// })?;
    /// assert_eq!(store.get("width", 0)?, 800);
    /// # Ok::<(), prefstore::PrefError>(())
    /// ```
    ///
    /// # Errors
    /// - The first `Validation` error recorded by the closure
    /// - `Storage` if the backend commit fails
    pub fn edit<F>(&self, f: F) -> PrefResult<()>
    where
        F: FnOnce(&mut PrefEdit),
    {
        let mut edit = PrefEdit::default();
        f(&mut edit);
        if let Some(err) = edit.error {
            return Err(err.into());
        }
        if edit.mutations.is_empty() {
            return Ok(());
        }
        self.commit(edit.mutations)
    }

    /// Reactive read of `key`.
    ///
    /// The stream yields the current value first, then the value after every
    /// commit that touches `key`. Absent values and values of another kind
    /// yield `default`.
    ///
    /// # Errors
    /// - `Validation` for an empty key
    /// - `Storage` if the current value cannot be read
    pub fn watch<T: Preference>(&self, key: impl KeyRef<T>, default: T) -> PrefResult<PrefStream<T>> {
        let name = key.key_name();
        validate_key(name)?;
        // A commit between reading the current value and publishing would
        // otherwise reach this subscriber twice.
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| StorageError::poisoned("store.watch"))?;
        let subscription = self
            .hub
            .subscribe_key(name, || self.backend.get(name).map_err(PrefError::from))?;
        Ok(PrefStream::new(subscription, default))
    }

    /// Stream of every committed change in the namespace.
    ///
    /// # Errors
    /// `Storage` if the subscription registry is poisoned.
    pub fn watch_all(&self) -> PrefResult<ChangeStream> {
        self.hub.subscribe_all()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Events discarded because a subscriber's buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.hub.dropped_events()
    }

    fn commit(&self, batch: Vec<Mutation>) -> PrefResult<()> {
        self.commit_changes(batch).map(drop)
    }

    fn commit_changes(&self, batch: Vec<Mutation>) -> PrefResult<Vec<PrefChange>> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| StorageError::poisoned("store.commit"))?;
        let changes = self.backend.apply(batch)?;
        self.hub.publish(&changes);
        Ok(changes)
    }
}

fn put_mutation(key: &str, value: PrefValue) -> Result<Mutation, ValidationError> {
    validate_key(key)?;
    if !value.is_storable() {
        return Err(ValidationError::NonFiniteNumber {
            key: key.to_string(),
        });
    }
    Ok(Mutation::Put {
        key: key.to_string(),
        value,
    })
}

/// Batch of changes recorded by [`KeyedPreferenceStore::edit`].
#[derive(Debug, Default)]
pub struct PrefEdit {
    mutations: Vec<Mutation>,
    error: Option<ValidationError>,
}

impl PrefEdit {
    /// Insert or replace the value under `key`.
    pub fn put<T: Preference>(&mut self, key: impl KeyRef<T>, value: T) -> &mut Self {
        match put_mutation(key.key_name(), value.into_value()) {
            Ok(mutation) => self.mutations.push(mutation),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Delete the entry under `key`.
    pub fn remove(&mut self, key: &str) -> &mut Self {
        match validate_key(key) {
            Ok(()) => self.mutations.push(Mutation::Remove {
                key: key.to_string(),
            }),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Delete every entry, including ones put earlier in this batch.
    pub fn clear(&mut self) -> &mut Self {
        self.mutations.push(Mutation::Clear);
        self
    }

    /// Number of recorded changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    fn fail(&mut self, err: ValidationError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}
