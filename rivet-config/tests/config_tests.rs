//! Integration tests for rivet-config

use rivet_config::*;
use rivet_core::{HostConfig, LogFormat, LogLevel};
use std::fs;
use std::path::PathBuf;

fn temp_file(name: &str, content: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rivet-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_defaults_file_env_precedence() {
    let path = temp_file(
        "layered.toml",
        r#"
            debug_mode = true
            default_content_type = "application/x-www-form-urlencoded"

            [request_logging]
            enabled = true
            capacity = 10

            [logging]
            level = "warn"
        "#,
    );

    let manager = ConfigManager::new();
    manager.load_defaults::<HostConfig>().unwrap();
    manager.load_file_auto(&path).unwrap();
    manager
        .load_env_from([
            ("RIVET_REQUEST_LOGGING__CAPACITY", "99"),
            ("RIVET_LOGGING__FORMAT", "compact"),
            ("UNRELATED", "1"),
        ])
        .unwrap();

    let config: HostConfig = manager.load_validated().unwrap();
    assert!(config.debug_mode);
    assert!(config.enable_access_restrictions);
    assert_eq!(config.default_content_type, "application/x-www-form-urlencoded");
    assert!(config.request_logging.enabled);
    assert_eq!(config.request_logging.capacity, 99);
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert_eq!(config.logging.format, LogFormat::Compact);
}

#[test]
fn test_json_file() {
    let path = temp_file("host.json", r#"{ "enable_access_restrictions": false }"#);

    let manager = ConfigManager::new();
    manager.load_file(&path, FileFormat::Json).unwrap();
    let config: HostConfig = manager.load_validated().unwrap();
    assert!(!config.enable_access_restrictions);
    assert_eq!(config.default_content_type, "application/json");
}

#[test]
fn test_dotenv_file_respects_prefix() {
    let path = temp_file(
        "app.env",
        "APP_DEBUG_MODE=true\nAPP_LOGGING__LEVEL=trace\nRIVET_DEBUG_MODE=false\n",
    );

    let manager = ConfigManager::with_prefix("APP");
    assert!(manager.load_dotenv(path.to_str()).unwrap());

    let config: HostConfig = manager.load_validated().unwrap();
    assert!(config.debug_mode);
    assert_eq!(config.logging.level, LogLevel::Trace);
}

#[test]
fn test_missing_dotenv_path_is_an_error() {
    let manager = ConfigManager::new();
    assert!(manager.load_dotenv(Some("/nonexistent/rivet/.env")).is_err());
}

#[test]
fn test_invalid_config_rejected() {
    let manager = ConfigManager::new();
    manager.load_defaults::<HostConfig>().unwrap();
    manager.set("default_content_type", "json").unwrap();

    let result = manager.load_validated::<HostConfig>();
    assert!(matches!(
        &result,
        Err(ConfigError::Invalid { field, .. }) if field == "default_content_type"
    ));

    let err: rivet_core::Error = result.unwrap_err().into();
    assert!(err.is_startup());
}

#[test]
fn test_wrong_type_is_deserialization_error() {
    let manager = ConfigManager::new();
    manager.load_env_from([("RIVET_DEBUG_MODE", "sometimes")]).unwrap();

    let result = manager.load_validated::<HostConfig>();
    assert!(matches!(result, Err(ConfigError::Decode { key: None, .. })));
}

#[test]
fn test_unsupported_extension() {
    let path = temp_file("host.yaml", "debug_mode: true");
    let manager = ConfigManager::new();
    assert!(matches!(
        manager.load_file_auto(&path),
        Err(ConfigError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_config_error_display() {
    let err = ConfigError::KeyNotFound("logging.level".to_string());
    assert!(err.to_string().contains("logging.level"));

    let path = temp_file("broken.toml", "debug_mode = ");
    let err = ConfigManager::new().load_file_auto(&path).unwrap_err();
    assert!(matches!(&err, ConfigError::Parse { origin, .. } if origin.ends_with("broken.toml")));
}
