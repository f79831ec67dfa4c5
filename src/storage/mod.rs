//! Storage backends for preference namespaces.
//!
//! The [`PreferenceBackend`] trait is the seam between the typed store and the
//! bytes on disk. Two implementations ship with the crate:
//! - [`InMemoryBackend`] for tests and ephemeral use
//! - `PersistentBackend` (feature `persistent`) for durable, crash-safe storage

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryBackend;
pub use traits::{Mutation, PrefChange, PreferenceBackend};

#[cfg(feature = "persistent")]
pub use persistent::{open_namespace, CompactionResult, PersistentBackend, PersistentConfig};
