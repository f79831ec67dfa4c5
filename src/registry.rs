//! Process-wide mapping from namespace id to its single live store.
//!
//! A registry is an ordinary value callers can hold and pass around. For code
//! that wants one shared instance, [`install`] places a registry in a
//! process-global slot that [`global`] and [`store`] read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

#[cfg(feature = "persistent")]
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PrefError, PrefResult, StorageError, ValidationError};
use crate::namespace::{validate_component, NamespaceId, DEFAULT_LOGICAL_PREFIX};
use crate::storage::{InMemoryBackend, PreferenceBackend};
use crate::store::KeyedPreferenceStore;
use crate::watch::WatchConfig;

#[cfg(feature = "persistent")]
use crate::storage::{PersistentBackend, PersistentConfig};

/// Where namespaces opened by a registry keep their entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendKind {
    /// Entries live only as long as the registry.
    #[default]
    InMemory,
    /// One directory per namespace under `data_dir`.
    #[cfg(feature = "persistent")]
    Persistent {
        data_dir: PathBuf,
        #[serde(default)]
        config: PersistentConfig,
    },
}

fn default_logical_prefix() -> String {
    DEFAULT_LOGICAL_PREFIX.to_string()
}

/// Registry configuration.
///
/// ```
/// use prefstore::RegistryConfig;
///
/// let config = RegistryConfig::from_json_str(r#"{"application_id": "com.example.notes"}"#)?;
/// assert_eq!(config.logical_prefix, "datastore");
/// # Ok::<(), prefstore::PrefError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// First component of every namespace id.
    pub application_id: String,
    /// Middle component of every namespace id.
    #[serde(default = "default_logical_prefix")]
    pub logical_prefix: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub watch: WatchConfig,
}

impl RegistryConfig {
    /// In-memory configuration with the default logical prefix.
    #[must_use]
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            logical_prefix: default_logical_prefix(),
            backend: BackendKind::InMemory,
            watch: WatchConfig::default(),
        }
    }

    /// Replace the logical prefix.
    #[must_use]
    pub fn with_logical_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.logical_prefix = prefix.into();
        self
    }

    /// Store namespaces on disk under `data_dir`.
    #[cfg(feature = "persistent")]
    #[must_use]
    pub fn persistent(mut self, data_dir: impl Into<PathBuf>, config: PersistentConfig) -> Self {
        self.backend = BackendKind::Persistent {
            data_dir: data_dir.into(),
            config,
        };
        self
    }

    /// Replace the watch settings.
    #[must_use]
    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    /// Parse a JSON configuration and validate it.
    ///
    /// # Errors
    /// `Serialization` for malformed JSON, `Validation` for invalid values.
    pub fn from_json_str(json: &str) -> PrefResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field.
    ///
    /// # Errors
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_component("application_id", &self.application_id)?;
        validate_component("logical_prefix", &self.logical_prefix)?;
        if self.watch.stream_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "watch.stream_capacity must be at least 1".to_string(),
            });
        }
        match &self.backend {
            BackendKind::InMemory => {}
            #[cfg(feature = "persistent")]
            BackendKind::Persistent { config, .. } => {
                config.clone().validate()?;
            }
        }
        Ok(())
    }
}

/// Hands out one shared [`KeyedPreferenceStore`] per namespace.
///
/// Stores are created on first request and live as long as the registry.
pub struct PreferenceRegistry {
    config: RegistryConfig,
    stores: Mutex<HashMap<NamespaceId, Arc<KeyedPreferenceStore>>>,
}

impl std::fmt::Debug for PreferenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceRegistry")
            .field("config", &self.config)
            .field("open", &self.stores.lock().map_or(0, |s| s.len()))
            .finish()
    }
}

impl PreferenceRegistry {
    /// Create a registry.
    ///
    /// # Errors
    /// `Validation` if the config is invalid.
    pub fn new(config: RegistryConfig) -> PrefResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stores: Mutex::new(HashMap::new()),
        })
    }

    /// The registry's configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The namespace id `frontend_id` maps to.
    ///
    /// # Errors
    /// `Validation` if `frontend_id` is empty or has unsupported characters.
    pub fn namespace_id(&self, frontend_id: &str) -> Result<NamespaceId, ValidationError> {
        NamespaceId::new(
            self.config.application_id.as_str(),
            self.config.logical_prefix.as_str(),
            frontend_id,
        )
    }

    /// The store for `frontend_id`, opening it on first use.
    ///
    /// Repeated calls with the same id return the same `Arc`.
    ///
    /// # Errors
    /// - `Validation` for an invalid frontend id
    /// - `Storage` if the namespace cannot be opened
    pub fn store(&self, frontend_id: &str) -> PrefResult<Arc<KeyedPreferenceStore>> {
        let namespace = self.namespace_id(frontend_id)?;

        // Held while opening so two callers never open the same namespace twice.
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| StorageError::poisoned("registry.store"))?;
        if let Some(store) = stores.get(&namespace) {
            return Ok(Arc::clone(store));
        }

        let backend = self.open_backend(&namespace)?;
        let store = Arc::new(KeyedPreferenceStore::new(
            namespace.clone(),
            backend,
            &self.config.watch,
        ));
        stores.insert(namespace, Arc::clone(&store));
        Ok(store)
    }

    /// Ids of every namespace opened so far, sorted.
    #[must_use]
    pub fn namespaces(&self) -> Vec<NamespaceId> {
        let mut ids: Vec<NamespaceId> = self
            .stores
            .lock()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn open_backend(&self, namespace: &NamespaceId) -> PrefResult<Arc<dyn PreferenceBackend>> {
        match &self.config.backend {
            BackendKind::InMemory => {
                tracing::debug!(namespace = %namespace, "namespace opened in memory");
                Ok(Arc::new(InMemoryBackend::new()))
            }
            #[cfg(feature = "persistent")]
            BackendKind::Persistent { data_dir, config } => {
                let dir = data_dir.join(namespace.as_str());
                let backend = PersistentBackend::open(&dir, config.clone())?;
                tracing::debug!(namespace = %namespace, dir = %dir.display(), "namespace opened");
                Ok(Arc::new(backend))
            }
        }
    }
}

static GLOBAL: OnceLock<PreferenceRegistry> = OnceLock::new();

/// Install the process-global registry.
///
/// # Errors
/// - `Validation` if the config is invalid
/// - `Internal` if a global registry is already installed
pub fn install(config: RegistryConfig) -> PrefResult<&'static PreferenceRegistry> {
    let registry = PreferenceRegistry::new(config)?;
    GLOBAL
        .set(registry)
        .map_err(|_| PrefError::internal("global preference registry already installed"))?;
    GLOBAL
        .get()
        .ok_or_else(|| PrefError::internal("global preference registry missing after install"))
}

/// The process-global registry, if installed.
#[must_use]
pub fn global() -> Option<&'static PreferenceRegistry> {
    GLOBAL.get()
}

/// The store for `frontend_id` from the process-global registry.
///
/// # Errors
/// `Internal` if no global registry is installed, otherwise as
/// [`PreferenceRegistry::store`].
pub fn store(frontend_id: &str) -> PrefResult<Arc<KeyedPreferenceStore>> {
    global()
        .ok_or_else(|| PrefError::internal("global preference registry not installed"))?
        .store(frontend_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PreferenceRegistry {
        PreferenceRegistry::new(RegistryConfig::new("app")).unwrap()
    }

    #[test]
    fn test_same_frontend_shares_store() {
        let registry = registry();
        let a = registry.store("settings").unwrap();
        let b = registry.store("settings").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.namespace().as_str(), "app_datastore_settings");
    }

    #[test]
    fn test_frontends_are_isolated() {
        let registry = registry();
        let settings = registry.store("settings").unwrap();
        let session = registry.store("session").unwrap();

        settings.save("k", 1i32).unwrap();
        assert!(!session.contains("k").unwrap());
        assert_eq!(registry.namespaces().len(), 2);
    }

    #[test]
    fn test_invalid_frontend_rejected() {
        let registry = registry();
        let err = registry.store("../escape").unwrap_err();
        assert!(err.is_validation());
        assert!(registry.namespaces().is_empty());
    }

    #[test]
    fn test_config_from_json_defaults() {
        let config = RegistryConfig::from_json_str(r#"{"application_id": "demo"}"#).unwrap();
        assert_eq!(config.logical_prefix, DEFAULT_LOGICAL_PREFIX);
        assert_eq!(config.backend, BackendKind::InMemory);
        assert_eq!(config.watch, WatchConfig::default());
    }

    #[test]
    fn test_config_validation() {
        assert!(RegistryConfig::from_json_str(r#"{"application_id": ""}"#)
            .unwrap_err()
            .is_validation());
        assert!(RegistryConfig::from_json_str("{").is_err());

        let config = RegistryConfig::new("app").with_watch(WatchConfig { stream_capacity: 0 });
        assert!(PreferenceRegistry::new(config).is_err());
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_persistent_config_from_json() {
        let config = RegistryConfig::from_json_str(
            r#"{
                "application_id": "demo",
                "logical_prefix": "prefs",
                "backend": {"type": "persistent", "data_dir": "/tmp/demo", "config": {"sync_on_write": false}}
            }"#,
        )
        .unwrap();
        match config.backend {
            BackendKind::Persistent { data_dir, config } => {
                assert_eq!(data_dir, PathBuf::from("/tmp/demo"));
                assert!(!config.sync_on_write);
            }
            BackendKind::InMemory => panic!("expected persistent backend"),
        }
    }

    #[cfg(feature = "persistent")]
    #[test]
    fn test_persistent_namespace_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig::new("app").persistent(
            dir.path(),
            PersistentConfig {
                sync_on_write: false,
                ..PersistentConfig::default()
            },
        );
        let registry = PreferenceRegistry::new(config).unwrap();
        registry.store("settings").unwrap().save("k", true).unwrap();
        assert!(dir.path().join("app_datastore_settings").join("prefs.wal").exists());
    }
}
