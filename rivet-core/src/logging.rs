//! Diagnostics for the service host.
//!
//! Everything logs through `tracing`. The macros are re-exported here so
//! service code and the host share one import path. How the events are
//! written is described by the `logging` section of
//! [`HostConfig`](crate::HostConfig) and installed with
//! [`ServiceHost::install_logging`](crate::ServiceHost::install_logging):
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "compact"
//! filter = "rivet_core::dispatcher=trace"
//!
//! [logging.output.rolling_file]
//! directory = "logs"
//! prefix = "rivet"
//! rotation = "daily"
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, with the enclosing span's fields.
    Json,
    Pretty,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Appended to, created if missing.
    File(String),
    RollingFile {
        directory: String,
        prefix: String,
        #[serde(default)]
        rotation: Rotation,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

/// The `logging` section of a host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// `EnvFilter` directives. Replaces `level` and `RUST_LOG` when set.
    pub filter: Option<String>,
    /// Record the file and line of each event.
    pub source_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            filter: None,
            source_location: false,
        }
    }
}

impl LogConfig {
    /// The filter to install: explicit directives, else `RUST_LOG`, else
    /// `level`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match &self.filter {
            Some(directives) => EnvFilter::try_new(directives)
                .map_err(|e| Error::Configuration(format!("logging.filter '{}': {}", directives, e))),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.directive()))),
        }
    }

    /// Install the global subscriber. Output is written on a background
    /// thread until the returned guard is dropped.
    pub(crate) fn install(&self) -> Result<WorkerGuard> {
        let filter = self.env_filter()?;
        let (writer, guard) = self.writer()?;
        tracing_subscriber::registry()
            .with(filter)
            .with(self.layer(writer))
            .try_init()
            .map_err(|e| Error::Configuration(format!("logging already installed: {}", e)))?;
        Ok(guard)
    }

    fn writer(&self) -> Result<(NonBlocking, WorkerGuard)> {
        Ok(match &self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| Error::Configuration(format!("log file {}: {}", path, e)))?;
                tracing_appender::non_blocking(file)
            }
            LogOutput::RollingFile {
                directory,
                prefix,
                rotation,
            } => {
                let rotation = match rotation {
                    Rotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
                    Rotation::Daily => tracing_appender::rolling::Rotation::DAILY,
                    Rotation::Never => tracing_appender::rolling::Rotation::NEVER,
                };
                let appender = RollingFileAppender::builder()
                    .rotation(rotation)
                    .filename_prefix(prefix)
                    .build(directory)
                    .map_err(|e| Error::Configuration(format!("log directory {}: {}", directory, e)))?;
                tracing_appender::non_blocking(appender)
            }
        })
    }

    fn layer<S>(&self, writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        // No ANSI escapes in files
        let ansi = matches!(self.output, LogOutput::Stdout | LogOutput::Stderr);
        let base = fmt::layer()
            .with_writer(writer)
            .with_file(self.source_location)
            .with_line_number(self.source_location);
        match self.format {
            LogFormat::Json => base.json().with_current_span(true).with_span_list(false).boxed(),
            LogFormat::Pretty => base.pretty().with_ansi(ansi).boxed(),
            LogFormat::Compact => base.compact().with_ansi(ansi).boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: LogConfig = serde_json::from_value(serde_json::json!({
            "format": "compact",
            "output": { "rolling_file": { "directory": "logs", "prefix": "rivet" } }
        }))
        .unwrap();

        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(matches!(
            config.output,
            LogOutput::RollingFile { rotation: Rotation::Daily, .. }
        ));
        assert!(!config.source_location);
    }

    #[test]
    fn test_bad_filter_is_a_configuration_error() {
        let config = LogConfig {
            filter: Some("rivet_core=loudest".into()),
            ..LogConfig::default()
        };
        assert!(matches!(config.env_filter(), Err(Error::Configuration(_))));

        let config = LogConfig {
            filter: Some("rivet_core::dispatcher=trace,warn".into()),
            ..LogConfig::default()
        };
        assert!(config.env_filter().is_ok());
    }

    #[test]
    fn test_unwritable_log_file_fails_before_install() {
        let config = LogConfig {
            output: LogOutput::File("/nonexistent-dir/rivet/app.log".into()),
            ..LogConfig::default()
        };
        assert!(matches!(config.install(), Err(Error::Configuration(_))));
    }
}
