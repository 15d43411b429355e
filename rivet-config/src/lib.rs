// Layered configuration for the rivet service host

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::{DEFAULT_PREFIX, EnvLoader, NESTING_SEPARATOR};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use rivet_core::HostConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A configuration tree built from layers. Each layer is merged over the
/// ones before it, tables key by key, so load in order of precedence:
/// defaults, then files, then the environment.
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Map<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    /// A manager reading `RIVET_` variables.
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::new(RwLock::new(Map::new())),
            env_prefix: Some(prefix.into()),
        }
    }

    /// Read every environment variable, unprefixed.
    pub fn without_prefix() -> Self {
        Self {
            config: Arc::new(RwLock::new(Map::new())),
            env_prefix: None,
        }
    }

    pub fn env_prefix(&self) -> Option<&str> {
        self.env_prefix.as_deref()
    }

    /// Merge `value` over the current tree.
    pub fn layer(&self, value: Value) -> Result<()> {
        let Value::Object(map) = value else {
            return Err(ConfigError::NotATable("configuration layer".to_string()));
        };
        merge_into(&mut self.config.write(), map);
        Ok(())
    }

    /// Put `T::default()` underneath everything loaded so far.
    pub fn load_defaults<T: Serialize + Default>(&self) -> Result<()> {
        let Value::Object(mut defaults) = to_value(&T::default())? else {
            return Err(ConfigError::NotATable(format!(
                "defaults of {}",
                std::any::type_name::<T>()
            )));
        };
        let mut config = self.config.write();
        merge_into(&mut defaults, std::mem::take(&mut *config));
        *config = defaults;
        Ok(())
    }

    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let loader = ConfigLoader::new(format).with_env_prefix(self.env_prefix.clone());
        let value = loader.load_file(path)?;
        debug!(path = %path.display(), format = ?format, "loaded config file");
        self.layer(value)
    }

    /// Load a file, picking the format from its extension.
    pub fn load_file_auto(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ConfigLoader::auto(path)?.format();
        self.load_file(path, format)
    }

    /// Layer the prefixed entries of a `.env` file without touching the
    /// process environment. With no path, `./.env` is used when present.
    /// Returns whether a file was read.
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<bool> {
        let path = match path {
            Some(path) => Path::new(path).to_path_buf(),
            None => {
                let default = Path::new(".env");
                if !default.exists() {
                    return Ok(false);
                }
                default.to_path_buf()
            }
        };

        let pairs = dotenvy::from_path_iter(&path)
            .map_err(|e| ConfigError::parse(path.display().to_string(), e))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()
            .map_err(|e| ConfigError::parse(path.display().to_string(), e))?;
        debug!(path = %path.display(), entries = pairs.len(), "loaded .env file");
        self.layer(EnvLoader::new(self.env_prefix.clone()).load_from(pairs))?;
        Ok(true)
    }

    /// Layer the process environment.
    pub fn load_env(&self) -> Result<()> {
        self.layer(EnvLoader::new(self.env_prefix.clone()).load())
    }

    /// Layer `vars` as if they were the environment.
    pub fn load_env_from<I, K, V>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.layer(EnvLoader::new(self.env_prefix.clone()).load_from(vars))
    }

    /// Set the value at a dotted `key` such as `request_logging.capacity`.
    pub fn set<T: Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = to_value(&value)?;
        let path: Vec<String> = key.split('.').map(str::to_string).collect();
        env::insert_path(&mut self.config.write(), &path, value);
        Ok(())
    }

    /// Get the value at a dotted `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;
        serde_json::from_value(value).map_err(|source| ConfigError::Decode {
            key: Some(key.to_string()),
            source,
        })
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Top-level keys
    pub fn keys(&self) -> Vec<String> {
        self.config.read().keys().cloned().collect()
    }

    /// Merge another manager's tree over this one.
    pub fn merge(&self, other: &ConfigManager) {
        let other = other.config.read().clone();
        merge_into(&mut self.config.write(), other);
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.config.read().clone())
    }

    /// Materialize the whole tree as `T` and validate it.
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let loaded: T = serde_json::from_value(self.to_value())
            .map_err(|source| ConfigError::Decode { key: None, source })?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let config = self.config.read();
        let mut parts = key.split('.');
        let mut current = config.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current.clone())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("env_prefix", &self.env_prefix)
            .field("keys", &self.keys())
            .finish()
    }
}

/// Load a [`HostConfig`]: defaults, then `file` if given, then `./.env`,
/// then `RIVET_` environment variables.
///
/// ```no_run
/// let config = rivet_config::load_host_config(Some("rivet.toml"))?;
/// # Ok::<(), rivet_config::ConfigError>(())
/// ```
pub fn load_host_config(file: Option<&str>) -> Result<HostConfig> {
    let manager = ConfigManager::new();
    manager.load_defaults::<HostConfig>()?;
    if let Some(file) = file {
        manager.load_file_auto(file)?;
    }
    manager.load_dotenv(None)?;
    manager.load_env()?;
    manager.load_validated()
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(ConfigError::Encode)
}

fn merge_into(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge_into(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_dotted() {
        let manager = ConfigManager::new();
        manager.set("request_logging.capacity", 25).unwrap();

        assert_eq!(manager.get_int("request_logging.capacity").unwrap(), 25);
        assert!(manager.has("request_logging"));
        assert!(!manager.has("request_logging.enabled"));
        assert!(matches!(
            manager.get_string("missing"),
            Err(ConfigError::KeyNotFound(_))
        ));
        assert_eq!(manager.get_or("missing", 7), 7);
    }

    #[test]
    fn test_layers_merge_tables() {
        let manager = ConfigManager::new();
        manager
            .layer(json!({ "logging": { "level": "info", "format": "json" } }))
            .unwrap();
        manager.layer(json!({ "logging": { "level": "debug" } })).unwrap();

        assert_eq!(manager.get_string("logging.level").unwrap(), "debug");
        assert_eq!(manager.get_string("logging.format").unwrap(), "json");
        assert!(manager.layer(json!(3)).is_err());
    }

    #[test]
    fn test_defaults_go_underneath() {
        let manager = ConfigManager::new();
        manager.set("debug_mode", true).unwrap();
        manager.load_defaults::<HostConfig>().unwrap();

        assert!(manager.get_bool("debug_mode").unwrap());
        assert!(manager.get_bool("enable_access_restrictions").unwrap());
    }

    #[test]
    fn test_merge_managers() {
        let base = ConfigManager::new();
        base.set("debug_mode", false).unwrap();
        let other = ConfigManager::new();
        other.set("debug_mode", true).unwrap();

        base.merge(&other);
        assert!(base.get_bool("debug_mode").unwrap());
        assert_eq!(base.keys(), vec!["debug_mode".to_string()]);
    }
}
