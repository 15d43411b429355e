// Host configuration

use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};

/// Settings for a [`ServiceHost`](crate::ServiceHost).
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// let config: rivet_core::HostConfig =
///     serde_json::from_str(r#"{ "debug_mode": true }"#).unwrap();
/// assert!(config.debug_mode);
/// assert!(config.enable_access_restrictions);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Enforce per-operation access restrictions.
    pub enable_access_restrictions: bool,
    /// Include error detail and a stack trace in faults.
    pub debug_mode: bool,
    /// Content type used when a request names none the host knows.
    pub default_content_type: String,
    /// Require route templates to start with `/` and carry no query string.
    pub strict_route_validation: bool,
    pub request_logging: RequestLoggingConfig,
    pub logging: LogConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            enable_access_restrictions: true,
            debug_mode: false,
            default_content_type: "application/json".to_string(),
            strict_route_validation: true,
            request_logging: RequestLoggingConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    pub fn enable_access_restrictions(mut self, enabled: bool) -> Self {
        self.enable_access_restrictions = enabled;
        self
    }

    pub fn default_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.default_content_type = content_type.into();
        self
    }

    pub fn strict_route_validation(mut self, strict: bool) -> Self {
        self.strict_route_validation = strict;
        self
    }

    pub fn request_logging(mut self, capacity: usize) -> Self {
        self.request_logging = RequestLoggingConfig {
            enabled: true,
            capacity,
        };
        self
    }

    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.logging = logging;
        self
    }
}

/// The in-memory request log kept when no logger is supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLoggingConfig {
    pub enabled: bool,
    /// Most recent entries kept.
    pub capacity: usize,
}

impl Default for RequestLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert!(config.enable_access_restrictions);
        assert!(!config.debug_mode);
        assert_eq!(config.default_content_type, "application/json");
        assert!(!config.request_logging.enabled);
    }

    #[test]
    fn test_partial_document() {
        let config: HostConfig = serde_json::from_str(
            r#"{ "enable_access_restrictions": false, "request_logging": { "enabled": true } }"#,
        )
        .unwrap();
        assert!(!config.enable_access_restrictions);
        assert!(config.request_logging.enabled);
        assert_eq!(config.request_logging.capacity, 1000);
    }

    #[test]
    fn test_builder() {
        let config = HostConfig::default().debug_mode(true).request_logging(10);
        assert!(config.debug_mode);
        assert_eq!(config.request_logging.capacity, 10);
    }
}
