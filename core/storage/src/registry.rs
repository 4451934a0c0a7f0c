//! Store registry for dynamic store resolution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::kv::KvStore;
use crate::local::LocalStore;
use crate::memory::MemoryStore;
use crate::store::SecretStore;
use keybundle_common::{Error, Result};

/// Factory function type for creating stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn SecretStore>> + Send + Sync>;

/// Which store a client talks to, tagged by `kind`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local, non-persistent.
    Memory,
    /// One JSON file per key under `root`.
    Local { root: PathBuf },
    /// Remote KV v2 engine.
    Kv {
        address: String,
        mount: String,
        token: String,
    },
}

impl StoreConfig {
    /// The registry name this configuration resolves through.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Local { .. } => "local",
            StoreConfig::Kv { .. } => "kv",
        }
    }

    /// A local store under the platform data directory.
    ///
    /// # Errors
    /// - `NotFound` if the platform has no data directory
    pub fn default_local() -> Result<Self> {
        let root = dirs::data_dir()
            .ok_or_else(|| Error::NotFound("No platform data directory".to_string()))?
            .join("keybundle")
            .join("store");
        Ok(StoreConfig::Local { root })
    }

    /// Build the store through `registry`.
    pub fn open(&self, registry: &StoreRegistry) -> Result<Arc<dyn SecretStore>> {
        let config = serde_json::to_value(self)
            .map_err(|e| Error::Serialization(format!("Store config: {}", e)))?;
        registry.resolve(self.kind(), config)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::Memory => write!(f, "Memory"),
            StoreConfig::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            StoreConfig::Kv { address, mount, .. } => f
                .debug_struct("Kv")
                .field("address", address)
                .field("mount", mount)
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Registry for secret store factories.
///
/// Allows dynamic registration and resolution of stores by name and
/// configuration.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Preconditions
    /// - `name` must be unique within the registry
    ///
    /// # Errors
    /// - `AlreadyExists` if the name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - `NotFound` if no factory has this name
    /// - `InvalidInput` if the configuration does not fit the store
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn SecretStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a store is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_config(config: Value) -> Result<StoreConfig> {
    serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid store config: {}", e)))
}

/// Create a registry with the built-in stores.
pub fn create_default_registry() -> StoreRegistry {
    let mut factories: HashMap<String, StoreFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(MemoryStore::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| match parse_config(config)? {
            StoreConfig::Local { root } => Ok(Arc::new(LocalStore::new(root)?)),
            _ => Err(Error::InvalidInput(
                "Local store requires a 'root' path".to_string(),
            )),
        }),
    );

    factories.insert(
        "kv".to_string(),
        Box::new(|config| match parse_config(config)? {
            StoreConfig::Kv {
                address,
                mount,
                token,
            } => Ok(Arc::new(KvStore::new(&address, &mount, token)?)),
            _ => Err(Error::InvalidInput(
                "KV store requires 'address', 'mount' and 'token'".to_string(),
            )),
        }),
    );

    StoreRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let store = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryStore::new()))));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = StoreRegistry::new();
        assert!(matches!(
            registry.resolve("unknown", Value::Null),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.stores(), vec!["kv", "local", "memory"]);
        assert!(registry.has_store("kv"));
    }

    #[test]
    fn test_config_opens_store() {
        let temp = TempDir::new().unwrap();
        let registry = create_default_registry();

        let local = StoreConfig::Local {
            root: temp.path().to_path_buf(),
        };
        assert_eq!(local.open(&registry).unwrap().name(), "local");
        assert_eq!(StoreConfig::Memory.open(&registry).unwrap().name(), "memory");

        let kv = StoreConfig::Kv {
            address: "http://127.0.0.1:8200".to_string(),
            mount: "pwmanager".to_string(),
            token: "root".to_string(),
        };
        assert_eq!(kv.open(&registry).unwrap().name(), "kv");
    }

    #[test]
    fn test_config_wire_shape() {
        let parsed: StoreConfig = serde_json::from_value(json!({
            "kind": "kv",
            "address": "http://127.0.0.1:8200",
            "mount": "pwmanager",
            "token": "s.abc"
        }))
        .unwrap();
        assert_eq!(parsed.kind(), "kv");
        assert!(!format!("{:?}", parsed).contains("s.abc"));

        let registry = create_default_registry();
        assert!(matches!(
            registry.resolve("local", json!({"kind": "memory"})),
            Err(Error::InvalidInput(_))
        ));
    }
}
