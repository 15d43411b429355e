// Configuration validation

use crate::{ConfigError, Result};
use rivet_core::{HostConfig, LogOutput};

/// Checked after a configuration is materialized.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable field checks
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::invalid(
                field,
                format!("must be between {} and {}, got {}", min, max, value),
            ));
        }
        Ok(())
    }

    /// A `type/subtype` media type.
    pub fn is_media_type(value: &str, field: &str) -> Result<()> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        match essence.split_once('/') {
            Some((kind, sub)) if !kind.is_empty() && !sub.is_empty() => Ok(()),
            _ => Err(ConfigError::invalid(
                field,
                format!("expected a media type such as application/json, got '{}'", value),
            )),
        }
    }
}

/// Upper bound on the in-memory request log.
pub const MAX_REQUEST_LOG_CAPACITY: usize = 1_000_000;

impl Validate for HostConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_media_type(&self.default_content_type, "default_content_type")?;

        if self.request_logging.enabled {
            ConfigValidator::in_range(
                self.request_logging.capacity,
                1,
                MAX_REQUEST_LOG_CAPACITY,
                "request_logging.capacity",
            )?;
        }

        match &self.logging.output {
            LogOutput::File(path) => ConfigValidator::not_empty(path, "logging.output.file")?,
            LogOutput::RollingFile {
                directory, prefix, ..
            } => {
                ConfigValidator::not_empty(directory, "logging.output.rolling_file.directory")?;
                ConfigValidator::not_empty(prefix, "logging.output.rolling_file.prefix")?;
            }
            LogOutput::Stdout | LogOutput::Stderr => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_checks() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
        assert!(ConfigValidator::in_range(5, 1, 10, "field").is_ok());
        assert!(ConfigValidator::in_range(11, 1, 10, "field").is_err());
        assert!(ConfigValidator::is_media_type("application/json; charset=utf-8", "f").is_ok());
        assert!(ConfigValidator::is_media_type("json", "f").is_err());
        assert!(ConfigValidator::is_media_type("application/", "f").is_err());
    }

    #[test]
    fn test_default_host_config_is_valid() {
        assert!(HostConfig::default().validate().is_ok());
    }

    #[test]
    fn test_host_config_rules() {
        let config = HostConfig::default().default_content_type("json");
        assert_eq!(config.validate().unwrap_err().field(), Some("default_content_type"));

        let config = HostConfig::default().request_logging(0);
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.logging.output = LogOutput::File(String::new());
        assert!(config.validate().is_err());
    }
}
