//! Reactive reads.
//!
//! Every namespace owns a `WatchHub`. After a batch commits, the store hands
//! the batch's per-key changes to the hub, which forwards them to matching
//! subscriptions over bounded crossbeam channels. Delivery never blocks the
//! writer: when a subscriber's buffer is full the oldest buffered event is
//! discarded, so the newest value always gets through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{PrefError, PrefResult, StorageError};
use crate::storage::PrefChange;
use crate::value::{PrefValue, Preference};

/// Watch stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Per-subscription buffer capacity.
    pub stream_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { stream_capacity: 64 }
    }
}

/// Identifier of one subscription within a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// The raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

enum Sink {
    Key {
        key: String,
        tx: Sender<Option<PrefValue>>,
        rx: Receiver<Option<PrefValue>>,
    },
    All {
        tx: Sender<PrefChange>,
        rx: Receiver<PrefChange>,
    },
}

/// Per-namespace subscription registry.
pub(crate) struct WatchHub {
    capacity: usize,
    next_id: AtomicU64,
    sinks: Mutex<HashMap<SubscriptionId, Sink>>,
    dropped_events: AtomicU64,
}

impl WatchHub {
    pub(crate) fn new(config: &WatchConfig) -> Arc<Self> {
        Arc::new(Self {
            capacity: config.stream_capacity.max(1),
            next_id: AtomicU64::new(1),
            sinks: Mutex::new(HashMap::new()),
            dropped_events: AtomicU64::new(0),
        })
    }

    fn allocate_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe to one key. `current` is read while the registry lock is
    /// held, so a concurrent commit is delivered after the initial value and
    /// never before it.
    pub(crate) fn subscribe_key<F>(
        self: &Arc<Self>,
        key: &str,
        current: F,
    ) -> PrefResult<Subscription<Option<PrefValue>>>
    where
        F: FnOnce() -> PrefResult<Option<PrefValue>>,
    {
        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| StorageError::poisoned("watch.subscribe"))?;

        let (tx, rx) = bounded(self.capacity);
        let initial = current()?;
        // Fresh channel with capacity >= 1: cannot be full.
        let _ = tx.try_send(initial);

        let id = self.allocate_id();
        sinks.insert(
            id,
            Sink::Key {
                key: key.to_string(),
                tx,
                rx: rx.clone(),
            },
        );
        tracing::debug!(subscription = id.0, key, "watch registered");
        Ok(Subscription::new(id, rx, Arc::downgrade(self)))
    }

    /// Subscribe to every change in the namespace.
    pub(crate) fn subscribe_all(self: &Arc<Self>) -> PrefResult<Subscription<PrefChange>> {
        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| StorageError::poisoned("watch.subscribe_all"))?;

        let (tx, rx) = bounded(self.capacity);
        let id = self.allocate_id();
        sinks.insert(id, Sink::All { tx, rx: rx.clone() });
        tracing::debug!(subscription = id.0, "namespace watch registered");
        Ok(Subscription::new(id, rx, Arc::downgrade(self)))
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut sinks) = self.sinks.lock() {
            if sinks.remove(&id).is_some() {
                tracing::debug!(subscription = id.0, "watch unregistered");
            }
        }
    }

    /// Forward committed changes to matching subscriptions.
    pub(crate) fn publish(&self, changes: &[PrefChange]) {
        if changes.is_empty() {
            return;
        }
        let Ok(sinks) = self.sinks.lock() else {
            tracing::warn!("watch registry lock poisoned; dropping notifications");
            return;
        };

        let mut dropped = 0u64;
        for sink in sinks.values() {
            match sink {
                Sink::Key { key, tx, rx } => {
                    if let Some(change) = changes.iter().find(|c| &c.key == key) {
                        dropped += deliver(tx, rx, change.new.clone());
                    }
                }
                Sink::All { tx, rx } => {
                    for change in changes {
                        dropped += deliver(tx, rx, change.clone());
                    }
                }
            }
        }

        if dropped > 0 {
            self.dropped_events.fetch_add(dropped, Ordering::Relaxed);
            tracing::warn!(dropped, "watch buffer full; discarded oldest events");
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.sinks.lock().map_or(0, |s| s.len())
    }

    pub(crate) fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// Sends `event`, evicting the oldest buffered event if the buffer is full.
/// Returns the number of events discarded.
fn deliver<E>(tx: &Sender<E>, rx: &Receiver<E>, event: E) -> u64 {
    match tx.try_send(event) {
        Ok(()) | Err(TrySendError::Disconnected(_)) => 0,
        Err(TrySendError::Full(event)) => {
            let evicted = u64::from(rx.try_recv().is_ok());
            match tx.try_send(event) {
                Ok(()) => evicted,
                Err(_) => evicted + 1,
            }
        }
    }
}

/// Untyped subscription handle.
///
/// Dropping it unregisters the subscription.
pub struct Subscription<E> {
    id: SubscriptionId,
    rx: Receiver<E>,
    hub: Weak<WatchHub>,
    unregistered: AtomicBool,
}

impl<E> std::fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl<E> Subscription<E> {
    fn new(id: SubscriptionId, rx: Receiver<E>, hub: Weak<WatchHub>) -> Self {
        Self {
            id,
            rx,
            hub,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving events. Idempotent; stored data is unaffected.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.unregistered.load(Ordering::Acquire) || self.hub.strong_count() == 0
    }

    /// Receive the next event, blocking.
    ///
    /// # Errors
    /// `Disconnected` once unsubscribed (and drained) or the store is gone.
    pub fn recv(&self) -> PrefResult<E> {
        // The hub keeps a receiver clone, so the channel never reports
        // disconnection on its own; poll so unsubscribe is observed.
        const POLL: Duration = Duration::from_millis(100);
        loop {
            match self.rx.recv_timeout(POLL) {
                Ok(event) => return Ok(event),
                Err(RecvTimeoutError::Disconnected) => return Err(PrefError::Disconnected),
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_closed() {
                        return Err(PrefError::Disconnected);
                    }
                }
            }
        }
    }

    /// Receive the next event with a timeout.
    ///
    /// # Errors
    /// `Timeout` if nothing arrives in time, `Disconnected` if closed.
    pub fn recv_timeout(&self, timeout: Duration) -> PrefResult<E> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) if !self.is_closed() => Err(PrefError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(_) => Err(PrefError::Disconnected),
        }
    }

    /// Take an already-buffered event without waiting.
    pub fn try_recv(&self) -> Option<E> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Namespace-wide change stream, see [`KeyedPreferenceStore::watch_all`].
///
/// [`KeyedPreferenceStore::watch_all`]: crate::KeyedPreferenceStore::watch_all
pub type ChangeStream = Subscription<PrefChange>;

/// Typed reactive read of one key.
///
/// Yields the value present when the stream was created, then the value after
/// every committed write to the key. Absent values and values of another kind
/// surface as the stream's default.
pub struct PrefStream<T: Preference> {
    inner: Subscription<Option<PrefValue>>,
    default: T,
}

impl<T: Preference + std::fmt::Debug> std::fmt::Debug for PrefStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefStream")
            .field("subscription", &self.inner)
            .field("default", &self.default)
            .finish()
    }
}

impl<T: Preference> PrefStream<T> {
    pub(crate) fn new(inner: Subscription<Option<PrefValue>>, default: T) -> Self {
        Self { inner, default }
    }

    fn resolve(&self, value: Option<PrefValue>) -> T {
        value
            .as_ref()
            .and_then(T::from_value)
            .unwrap_or_else(|| self.default.clone())
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.inner.id()
    }

    /// Stop receiving values.
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    /// Next value, blocking.
    ///
    /// # Errors
    /// `Disconnected` once unsubscribed or the store is gone.
    pub fn recv(&self) -> PrefResult<T> {
        self.inner.recv().map(|v| self.resolve(v))
    }

    /// Next value with a timeout.
    ///
    /// # Errors
    /// `Timeout` or `Disconnected`.
    pub fn recv_timeout(&self, timeout: Duration) -> PrefResult<T> {
        self.inner.recv_timeout(timeout).map(|v| self.resolve(v))
    }

    /// An already-buffered value, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.inner.try_recv().map(|v| self.resolve(v))
    }

    /// The most recent buffered value, discarding older ones.
    pub fn latest(&self) -> Option<T> {
        let mut last = None;
        while let Some(v) = self.inner.try_recv() {
            last = Some(v);
        }
        last.map(|v| self.resolve(v))
    }

    #[cfg(feature = "async")]
    pub(crate) fn into_parts(self) -> (Subscription<Option<PrefValue>>, T) {
        (self.inner, self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: &str, new: Option<PrefValue>) -> PrefChange {
        PrefChange {
            key: key.to_string(),
            old: None,
            new,
        }
    }

    #[test]
    fn test_key_subscription_gets_initial_then_updates() {
        let hub = WatchHub::new(&WatchConfig::default());
        let sub = hub
            .subscribe_key("count", || Ok(Some(PrefValue::Int(1))))
            .unwrap();

        hub.publish(&[change("other", Some(PrefValue::Int(9)))]);
        hub.publish(&[change("count", Some(PrefValue::Int(2)))]);
        hub.publish(&[change("count", None)]);

        assert_eq!(sub.try_recv(), Some(Some(PrefValue::Int(1))));
        assert_eq!(sub.try_recv(), Some(Some(PrefValue::Int(2))));
        assert_eq!(sub.try_recv(), Some(None));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn test_full_buffer_keeps_newest() {
        let hub = WatchHub::new(&WatchConfig { stream_capacity: 2 });
        let sub = hub.subscribe_key("k", || Ok(None)).unwrap();

        for i in 0..5 {
            hub.publish(&[change("k", Some(PrefValue::Int(i)))]);
        }

        let stream = PrefStream::new(sub, -1);
        assert_eq!(stream.latest(), Some(4));
        assert!(hub.dropped_events() > 0);
    }

    #[test]
    fn test_drop_unregisters() {
        let hub = WatchHub::new(&WatchConfig::default());
        let sub = hub.subscribe_all().unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_recv_after_unsubscribe_disconnects() {
        let hub = WatchHub::new(&WatchConfig::default());
        let sub = hub.subscribe_all().unwrap();
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(matches!(sub.recv(), Err(PrefError::Disconnected)));
        assert!(matches!(
            sub.recv_timeout(Duration::from_millis(10)),
            Err(PrefError::Disconnected)
        ));
    }

    #[test]
    fn test_recv_timeout_when_idle() {
        let hub = WatchHub::new(&WatchConfig::default());
        let sub = hub.subscribe_all().unwrap();
        assert!(matches!(
            sub.recv_timeout(Duration::from_millis(10)),
            Err(PrefError::Timeout { duration_ms: 10 })
        ));
    }

    #[test]
    fn test_typed_stream_maps_mismatch_to_default() {
        let hub = WatchHub::new(&WatchConfig::default());
        let sub = hub
            .subscribe_key("flag", || Ok(Some(PrefValue::String("yes".into()))))
            .unwrap();
        let stream = PrefStream::new(sub, false);

        assert!(!stream.recv().unwrap());
        hub.publish(&[change("flag", Some(PrefValue::Bool(true)))]);
        assert!(stream.recv().unwrap());
    }

    #[test]
    fn test_hub_dropped_disconnects_stream() {
        let hub = WatchHub::new(&WatchConfig::default());
        let sub = hub.subscribe_all().unwrap();
        drop(hub);
        assert!(matches!(sub.recv(), Err(PrefError::Disconnected)));
    }
}
