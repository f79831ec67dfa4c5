//! Async facade for tokio applications.
//!
//! Every call runs the blocking store operation on tokio's blocking pool, so
//! WAL fsyncs never stall the async runtime. Watch streams are bridged from
//! crossbeam subscriptions into `tokio_stream` streams by a blocking forwarder
//! task that exits once the receiving side is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{PrefError, PrefResult};
use crate::storage::PrefChange;
use crate::store::{KeyedPreferenceStore, PrefEdit};
use crate::value::{PrefValue, Preference};
use crate::watch::Subscription;

/// How often a forwarder checks whether its receiver went away.
const FORWARD_POLL: Duration = Duration::from_millis(250);

/// Async handle to a [`KeyedPreferenceStore`].
///
/// Cheap to clone; clones share the underlying store.
#[derive(Debug, Clone)]
pub struct AsyncPreferenceStore {
    inner: Arc<KeyedPreferenceStore>,
}

impl From<Arc<KeyedPreferenceStore>> for AsyncPreferenceStore {
    fn from(inner: Arc<KeyedPreferenceStore>) -> Self {
        Self::new(inner)
    }
}

impl AsyncPreferenceStore {
    #[must_use]
    pub fn new(inner: Arc<KeyedPreferenceStore>) -> Self {
        Self { inner }
    }

    /// The wrapped blocking store.
    #[must_use]
    pub fn blocking(&self) -> &Arc<KeyedPreferenceStore> {
        &self.inner
    }

    async fn run<R, F>(&self, op: F) -> PrefResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&KeyedPreferenceStore) -> PrefResult<R> + Send + 'static,
    {
        let store = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| PrefError::internal(format!("blocking store task failed: {e}")))?
    }

    /// See [`KeyedPreferenceStore::save`].
    ///
    /// # Errors
    /// As the blocking call, or `Internal` if the blocking task panicked.
    pub async fn save<T: Preference>(&self, key: impl Into<String>, value: T) -> PrefResult<()> {
        let key = key.into();
        self.run(move |s| s.save(key, value)).await
    }

    /// See [`KeyedPreferenceStore::get`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn get<T: Preference>(&self, key: impl Into<String>, default: T) -> PrefResult<T> {
        let key = key.into();
        self.run(move |s| s.get(key, default)).await
    }

    /// See [`KeyedPreferenceStore::get_opt`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn get_opt<T: Preference>(&self, key: impl Into<String>) -> PrefResult<Option<T>> {
        let key = key.into();
        self.run(move |s| s.get_opt(key)).await
    }

    /// See [`KeyedPreferenceStore::remove`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn remove(&self, key: impl Into<String>) -> PrefResult<bool> {
        let key = key.into();
        self.run(move |s| s.remove(&key)).await
    }

    /// See [`KeyedPreferenceStore::clear`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn clear(&self) -> PrefResult<()> {
        self.run(KeyedPreferenceStore::clear).await
    }

    /// See [`KeyedPreferenceStore::contains`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn contains(&self, key: impl Into<String>) -> PrefResult<bool> {
        let key = key.into();
        self.run(move |s| s.contains(&key)).await
    }

    /// See [`KeyedPreferenceStore::list_keys`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn list_keys(&self) -> PrefResult<Vec<String>> {
        self.run(KeyedPreferenceStore::list_keys).await
    }

    /// See [`KeyedPreferenceStore::snapshot`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn snapshot(&self) -> PrefResult<HashMap<String, PrefValue>> {
        self.run(KeyedPreferenceStore::snapshot).await
    }

    /// See [`KeyedPreferenceStore::save_json`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn save_json<V>(&self, key: impl Into<String>, value: V) -> PrefResult<()>
    where
        V: Serialize + Send + 'static,
    {
        let key = key.into();
        self.run(move |s| s.save_json(&key, &value)).await
    }

    /// See [`KeyedPreferenceStore::get_json`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn get_json<V>(&self, key: impl Into<String>) -> PrefResult<Option<V>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let key = key.into();
        self.run(move |s| s.get_json(&key)).await
    }

    /// See [`KeyedPreferenceStore::edit`].
    ///
    /// # Errors
    /// As the blocking call.
    pub async fn edit<F>(&self, f: F) -> PrefResult<()>
    where
        F: FnOnce(&mut PrefEdit) + Send + 'static,
    {
        self.run(move |s| s.edit(f)).await
    }

    /// Reactive read of `key` as a tokio stream.
    ///
    /// Dropping the stream cancels the subscription.
    ///
    /// # Errors
    /// As [`KeyedPreferenceStore::watch`].
    pub async fn watch<T>(&self, key: impl Into<String>, default: T) -> PrefResult<ReceiverStream<T>>
    where
        T: Preference,
    {
        let key = key.into();
        let stream = self.run(move |s| s.watch(key, default)).await?;
        let (subscription, default) = stream.into_parts();
        Ok(forward(subscription, move |value: Option<PrefValue>| {
            value
                .as_ref()
                .and_then(T::from_value)
                .unwrap_or_else(|| default.clone())
        }))
    }

    /// Every committed change in the namespace as a tokio stream.
    ///
    /// # Errors
    /// As [`KeyedPreferenceStore::watch_all`].
    pub async fn watch_all(&self) -> PrefResult<ReceiverStream<PrefChange>> {
        let subscription = self.run(KeyedPreferenceStore::watch_all).await?;
        Ok(forward(subscription, |change| change))
    }
}

fn forward<E, T, M>(subscription: Subscription<E>, map: M) -> ReceiverStream<T>
where
    E: Send + 'static,
    T: Send + 'static,
    M: Fn(E) -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<T>(64);
    tokio::task::spawn_blocking(move || loop {
        match subscription.recv_timeout(FORWARD_POLL) {
            Ok(event) => {
                if tx.blocking_send(map(event)).is_err() {
                    subscription.unsubscribe();
                    break;
                }
            }
            Err(PrefError::Timeout { .. }) => {
                if tx.is_closed() {
                    subscription.unsubscribe();
                    break;
                }
            }
            Err(_) => break,
        }
    });
    ReceiverStream::new(rx)
}
