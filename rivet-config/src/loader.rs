// Configuration file loaders

use crate::env::EnvLoader;
use crate::{ConfigError, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::Toml => "toml",
            FileFormat::Env => "env",
        }
    }

    /// Detect the format of `path`. A bare `.env` file counts as env.
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.file_name().is_some_and(|name| name == ".env") {
            return Some(FileFormat::Env);
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// Parses one configuration file into a JSON tree.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    format: FileFormat,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self {
            format,
            env_prefix: None,
        }
    }

    /// Auto-detect format from file extension
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
        Ok(Self::new(format))
    }

    /// Only keys carrying `prefix` are read from env files.
    pub fn with_env_prefix(mut self, prefix: Option<String>) -> Self {
        self.env_prefix = prefix;
        self
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(&content).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::parse(path.display().to_string(), reason),
            other => other,
        })
    }

    /// Parse `content`. The result is always an object.
    pub fn parse(&self, content: &str) -> Result<Value> {
        let value = match self.format {
            FileFormat::Json => self.parse_json(content)?,
            FileFormat::Toml => self.parse_toml(content)?,
            FileFormat::Env => self.parse_env(content)?,
        };
        if !value.is_object() {
            return Err(ConfigError::parse(
                self.format.name(),
                "the top level must be a table",
            ));
        }
        Ok(value)
    }

    fn parse_json(&self, content: &str) -> Result<Value> {
        serde_json::from_str(content)
            .map_err(|e| ConfigError::parse(self.format.name(), e))
    }

    fn parse_toml(&self, content: &str) -> Result<Value> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| ConfigError::parse(self.format.name(), e))?;
        serde_json::to_value(table).map_err(ConfigError::Encode)
    }

    fn parse_env(&self, content: &str) -> Result<Value> {
        let pairs = dotenvy::from_read_iter(content.as_bytes())
            .collect::<std::result::Result<Vec<(String, String)>, _>>()
            .map_err(|e| ConfigError::parse(self.format.name(), e))?;
        Ok(EnvLoader::new(self.env_prefix.clone()).load_from(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let loader = ConfigLoader::new(FileFormat::Json);
        let value = loader.parse(r#"{"debug_mode": true}"#).unwrap();
        assert_eq!(value["debug_mode"], true);

        assert!(matches!(
            loader.parse("[1, 2]"),
            Err(ConfigError::Parse { origin, .. }) if origin == "json"
        ));
    }

    #[test]
    fn test_parse_toml() {
        let loader = ConfigLoader::new(FileFormat::Toml);
        let toml = r#"
            default_content_type = "application/json"

            [request_logging]
            enabled = true
            capacity = 10
        "#;

        let value = loader.parse(toml).unwrap();
        assert_eq!(value["default_content_type"], "application/json");
        assert_eq!(value["request_logging"]["capacity"], 10);
    }

    #[test]
    fn test_parse_env() {
        let loader = ConfigLoader::new(FileFormat::Env).with_env_prefix(Some("RIVET".into()));
        let env = "# comment\nRIVET_DEBUG_MODE=true\nRIVET_LOGGING__FORMAT=\"pretty\"\nPATH_ONLY=1\n";

        let value = loader.parse(env).unwrap();
        assert_eq!(value["debug_mode"], true);
        assert_eq!(value["logging"]["format"], "pretty");
        assert!(value.get("path_only").is_none());
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(FileFormat::from_extension("JSON"), Some(FileFormat::Json));
        assert_eq!(FileFormat::from_extension("toml"), Some(FileFormat::Toml));
        assert_eq!(FileFormat::from_extension("yaml"), None);
        assert_eq!(FileFormat::from_path(Path::new("conf/.env")), Some(FileFormat::Env));
        assert!(matches!(
            ConfigLoader::auto("rivet.ini"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
