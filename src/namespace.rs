//! Namespace identifiers.
//!
//! A namespace id is `{application_id}_{logical_prefix}_{frontend_id}`. It
//! names the backing store (a directory for the persistent backend), so each
//! component is restricted to characters that are safe in file names.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default logical prefix placed between application and frontend ids.
pub const DEFAULT_LOGICAL_PREFIX: &str = "datastore";

fn component_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static pattern compiles"))
}

pub(crate) fn validate_component(
    component: &'static str,
    value: &str,
) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::EmptyNamespaceComponent { component });
    }
    // "." and ".." would escape the data directory.
    if value.chars().all(|c| c == '.') || !component_pattern().is_match(value) {
        return Err(ValidationError::InvalidNamespaceComponent {
            component,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Identifier of one isolated preference namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamespaceId {
    application_id: String,
    logical_prefix: String,
    frontend_id: String,
    full: String,
}

impl NamespaceId {
    /// Builds a namespace id, validating every component.
    ///
    /// # Errors
    /// Returns a validation error if any component is empty or contains
    /// characters outside `A-Z a-z 0-9 . _ -`.
    pub fn new(
        application_id: impl Into<String>,
        logical_prefix: impl Into<String>,
        frontend_id: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let application_id = application_id.into();
        let logical_prefix = logical_prefix.into();
        let frontend_id = frontend_id.into();

        validate_component("application_id", &application_id)?;
        validate_component("logical_prefix", &logical_prefix)?;
        validate_component("frontend_id", &frontend_id)?;

        let full = format!("{application_id}_{logical_prefix}_{frontend_id}");
        Ok(Self {
            application_id,
            logical_prefix,
            frontend_id,
            full,
        })
    }

    #[must_use]
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    #[must_use]
    pub fn logical_prefix(&self) -> &str {
        &self.logical_prefix
    }

    #[must_use]
    pub fn frontend_id(&self) -> &str {
        &self.frontend_id
    }

    /// The composite `{application_id}_{logical_prefix}_{frontend_id}` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for NamespaceId {
    fn as_ref(&self) -> &str {
        &self.full
    }
}
