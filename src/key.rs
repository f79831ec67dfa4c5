//! Typed preference keys.

use std::fmt;
use std::marker::PhantomData;

use crate::error::ValidationError;
use crate::value::{PrefKind, Preference};

/// A key name bound to the Rust type stored under it.
///
/// The type parameter fixes the kind used for reads and writes, so a
/// `PrefKey<i32>` can never be read back as a string by accident.
///
/// ```
/// use prefstore::PrefKey;
///
/// const LAUNCH_COUNT: PrefKey<i32> = PrefKey::new("launch_count");
/// assert_eq!(LAUNCH_COUNT.name(), "launch_count");
/// ```
pub struct PrefKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Preference> PrefKey<T> {
    /// Creates a key. Usable in `const` position.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The kind values under this key are stored as.
    #[must_use]
    pub const fn kind(&self) -> PrefKind {
        T::KIND
    }
}

impl<T> Clone for PrefKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PrefKey<T> {}

impl<T> fmt::Debug for PrefKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrefKey").field(&self.name).finish()
    }
}

impl<T> PartialEq for PrefKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for PrefKey<T> {}

/// Anything that names a key holding a `T`: a plain string or a [`PrefKey<T>`].
pub trait KeyRef<T> {
    /// The key name.
    fn key_name(&self) -> &str;
}

impl<T> KeyRef<T> for &str {
    fn key_name(&self) -> &str {
        self
    }
}

impl<T> KeyRef<T> for String {
    fn key_name(&self) -> &str {
        self
    }
}

impl<T> KeyRef<T> for &String {
    fn key_name(&self) -> &str {
        self
    }
}

impl<T: Preference> KeyRef<T> for PrefKey<T> {
    fn key_name(&self) -> &str {
        self.name
    }
}

impl<T: Preference> KeyRef<T> for &PrefKey<T> {
    fn key_name(&self) -> &str {
        self.name
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::EmptyKey);
    }
    Ok(())
}
