// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::{Map, Number, Value};
use std::env;

/// Prefix used by [`ConfigManager::new`](crate::ConfigManager::new).
pub const DEFAULT_PREFIX: &str = "RIVET";

/// Separates nesting levels in a variable name:
/// `RIVET_REQUEST_LOGGING__CAPACITY` sets `request_logging.capacity`.
pub const NESTING_SEPARATOR: &str = "__";

/// Reads prefixed environment variables into a configuration tree.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Every matching variable of the process environment.
    pub fn load(&self) -> Value {
        self.load_from(env::vars())
    }

    /// Build a tree from `vars`. Names without the prefix are skipped, the
    /// rest are lower-cased and split on `__`. Values that parse as a bool
    /// or a number are stored as one.
    pub fn load_from<I, K, V>(&self, vars: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut root = Map::new();
        for (key, value) in vars {
            if let Some(path) = self.key_path(key.as_ref()) {
                insert_path(&mut root, &path, parse_scalar(value.as_ref()));
            }
        }
        Value::Object(root)
    }

    /// Read one variable, prefix applied.
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };
        env::var(&full_key).map_err(|source| ConfigError::Var {
            name: full_key.clone(),
            source,
        })
    }

    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    fn key_path(&self, key: &str) -> Option<Vec<String>> {
        let rest = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
            None => key,
        };
        let path: Vec<String> = rest.split(NESTING_SEPARATOR).map(str::to_lowercase).collect();
        if path.iter().any(String::is_empty) {
            return None;
        }
        Some(path)
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }
}

/// Set `value` at `path`, replacing any scalar in the way.
pub(crate) fn insert_path(root: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}

fn parse_scalar(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Ok(float) = raw.parse::<f64>()
        && let Some(number) = Number::from_f64(float)
    {
        return Value::Number(number);
    }
    Value::String(raw.to_string())
}
