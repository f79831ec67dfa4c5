//! # prefstore - namespaced, typed preference storage
//!
//! prefstore is a thin layer over a key-value persistence backend. It groups
//! preferences into isolated namespaces, reads and writes them as typed
//! values, and re-delivers a key's value to subscribers whenever it changes.
//!
//! ## Core Concepts
//!
//! - **Namespace**: an isolated key-value collection named
//!   `{application_id}_{logical_prefix}_{frontend_id}`
//! - **Entry**: a key name and a [`PrefValue`]; each entry records its kind
//! - **Store**: [`KeyedPreferenceStore`], typed operations over one namespace
//! - **Registry**: [`PreferenceRegistry`], at most one live store per namespace
//! - **Backend**: [`storage::PreferenceBackend`], in memory or durable on disk
//!
//! ## Usage
//!
//! ```rust
//! use prefstore::{PrefKey, PreferenceRegistry, RegistryConfig};
//!
//! const DARK_MODE: PrefKey<bool> = PrefKey::new("dark_mode");
//!
//! let registry = PreferenceRegistry::new(RegistryConfig::new("com.example.notes"))?;
//! let settings = registry.store("settings")?;
//!
//! let changes = settings.watch(DARK_MODE, false)?;
//! assert!(!changes.recv()?);
//!
//! settings.save(DARK_MODE, true)?;
//! assert!(changes.recv()?);
//! assert!(settings.get(DARK_MODE, false)?);
//! # Ok::<(), prefstore::PrefError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod key;
pub mod namespace;
pub mod value;

// Storage, stores, and the registry
pub mod registry;
pub mod storage;
pub mod store;
pub mod watch;

#[cfg(feature = "async")]
pub mod async_store;

// Re-export primary types at crate root for convenience
pub use error::{PrefError, PrefResult, StorageError, ValidationError};
pub use key::{KeyRef, PrefKey};
pub use namespace::{NamespaceId, DEFAULT_LOGICAL_PREFIX};
pub use value::{PrefKind, PrefValue, Preference};

pub use registry::{BackendKind, PreferenceRegistry, RegistryConfig};
pub use storage::{InMemoryBackend, Mutation, PrefChange, PreferenceBackend};
pub use store::{KeyedPreferenceStore, PrefEdit};
pub use watch::{ChangeStream, PrefStream, Subscription, SubscriptionId, WatchConfig};

#[cfg(feature = "persistent")]
pub use storage::{open_namespace, CompactionResult, PersistentBackend, PersistentConfig};

#[cfg(feature = "async")]
pub use async_store::AsyncPreferenceStore;
