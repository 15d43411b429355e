// Configuration errors, each naming the file, key or field at fault

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no configuration value at '{0}'")]
    KeyNotFound(String),

    #[error("{} has no recognized config extension (json, toml, env)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `origin` is a path, or a format name for in-memory documents.
    #[error("cannot parse {origin}: {reason}")]
    Parse { origin: String, reason: String },

    /// A layer or default set whose top level is not a table.
    #[error("{0} is not a table")]
    NotATable(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("cannot encode configuration value: {0}")]
    Encode(#[source] serde_json::Error),

    /// `key` is `None` when the whole tree failed to materialize.
    #[error("cannot decode {}: {source}", .key.as_deref().unwrap_or("configuration"))]
    Decode {
        key: Option<String>,
        #[source]
        source: serde_json::Error,
    },

    #[error("environment variable {name}: {source}")]
    Var {
        name: String,
        #[source]
        source: std::env::VarError,
    },
}

impl ConfigError {
    pub(crate) fn parse(origin: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Parse {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// The field a validation failure is about.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Host startup sees every configuration problem as a configuration error.
impl From<ConfigError> for rivet_core::Error {
    fn from(err: ConfigError) -> Self {
        rivet_core::Error::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
