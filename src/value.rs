//! Value types a preference entry can hold.
//!
//! Every entry records its kind. Typed reads only succeed when the requested
//! type matches the stored kind; anything else falls back to the caller's
//! default.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A stored preference value.
///
/// # Examples
///
/// ```
/// use prefstore::{PrefKind, PrefValue};
///
/// let v = PrefValue::Int(3);
/// assert_eq!(v.kind(), PrefKind::Int);
/// assert_eq!(v.as_int(), Some(3));
/// assert_eq!(v.as_long(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PrefValue {
    String(String),
    Int(i32),
    Bool(bool),
    Float(f32),
    Long(i64),
    Double(f64),
    StringSet(BTreeSet<String>),
}

/// The kind tag of a [`PrefValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefKind {
    String,
    Int,
    Bool,
    Float,
    Long,
    Double,
    StringSet,
}

impl fmt::Display for PrefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Float => "float",
            Self::Long => "long",
            Self::Double => "double",
            Self::StringSet => "string_set",
        };
        f.write_str(name)
    }
}

impl PrefValue {
    /// Returns the kind tag of this value.
    #[must_use]
    pub const fn kind(&self) -> PrefKind {
        match self {
            Self::String(_) => PrefKind::String,
            Self::Int(_) => PrefKind::Int,
            Self::Bool(_) => PrefKind::Bool,
            Self::Float(_) => PrefKind::Float,
            Self::Long(_) => PrefKind::Long,
            Self::Double(_) => PrefKind::Double,
            Self::StringSet(_) => PrefKind::StringSet,
        }
    }

    /// Returns false for NaN or infinite floats, which JSON cannot carry.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        match self {
            Self::Float(v) => v.is_finite(),
            Self::Double(v) => v.is_finite(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_string_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::StringSet(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PrefValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) => write!(f, "\"{v}\""),
            Self::Int(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}f"),
            Self::Long(v) => write!(f, "{v}L"),
            Self::Double(v) => write!(f, "{v}"),
            Self::StringSet(set) => {
                f.write_str("{")?;
                for (i, item) in set.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "\"{item}\"")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A Rust type that maps onto exactly one [`PrefKind`].
///
/// Implemented for `String`, `i32`, `bool`, `f32`, `i64`, `f64` and
/// `BTreeSet<String>`.
pub trait Preference: Sized + Clone + Send + 'static {
    /// The stored kind for this type.
    const KIND: PrefKind;

    /// Wraps the value for storage.
    fn into_value(self) -> PrefValue;

    /// Extracts a value of this type, or `None` on kind mismatch.
    fn from_value(value: &PrefValue) -> Option<Self>;
}

macro_rules! impl_copy_preference {
    ($ty:ty, $variant:ident) => {
        impl Preference for $ty {
            const KIND: PrefKind = PrefKind::$variant;

            fn into_value(self) -> PrefValue {
                PrefValue::$variant(self)
            }

            fn from_value(value: &PrefValue) -> Option<Self> {
                match value {
                    PrefValue::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_copy_preference!(i32, Int);
impl_copy_preference!(bool, Bool);
impl_copy_preference!(f32, Float);
impl_copy_preference!(i64, Long);
impl_copy_preference!(f64, Double);

impl Preference for String {
    const KIND: PrefKind = PrefKind::String;

    fn into_value(self) -> PrefValue {
        PrefValue::String(self)
    }

    fn from_value(value: &PrefValue) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl Preference for BTreeSet<String> {
    const KIND: PrefKind = PrefKind::StringSet;

    fn into_value(self) -> PrefValue {
        PrefValue::StringSet(self)
    }

    fn from_value(value: &PrefValue) -> Option<Self> {
        value.as_string_set().cloned()
    }
}
