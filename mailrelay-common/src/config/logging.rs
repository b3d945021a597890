//! Logging sink settings.

use std::{path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::metadata::LevelFilter;

use crate::error::ConfigError;

/// Where formatted log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    Stderr,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error, off.
    #[serde(default = "defaults::level")]
    pub level: String,

    #[serde(default)]
    pub destination: LogDestination,

    /// Directory holding the active and rotated log files.
    #[serde(default = "defaults::directory")]
    pub directory: PathBuf,

    /// File stem; the active file is `<name>.log`.
    #[serde(default = "defaults::name")]
    pub name: String,

    /// Bytes buffered in memory before they are written to the file.
    #[serde(default = "defaults::buffer_size")]
    pub buffer_size: usize,

    /// The active file is rotated once it would grow past this size.
    #[serde(default = "defaults::max_size_mb")]
    pub max_size_mb: u64,

    /// Oldest rotated files are removed while all files together exceed this.
    #[serde(default = "defaults::max_total_size_mb")]
    pub max_total_size_mb: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::level(),
            destination: LogDestination::default(),
            directory: defaults::directory(),
            name: defaults::name(),
            buffer_size: defaults::buffer_size(),
            max_size_mb: defaults::max_size_mb(),
            max_total_size_mb: defaults::max_total_size_mb(),
        }
    }
}

impl LoggingConfig {
    /// Path of the active log file.
    #[must_use]
    pub fn file_path(&self) -> PathBuf {
        self.directory.join(format!("{}.log", self.name))
    }

    /// The configured level as a filter.
    ///
    /// # Errors
    /// When `level` is not a recognised level name.
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.level).map_err(|_| ConfigError::Invalid {
            field: "logging.level",
            reason: format!("unknown level '{}'", self.level),
        })
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.level_filter()?;

        if self.destination == LogDestination::Stderr {
            return Ok(());
        }

        if self.directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("logging.directory"));
        }

        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("logging.name"));
        }

        for (field, value) in [
            ("logging.buffer_size", self.buffer_size as u64),
            ("logging.max_size_mb", self.max_size_mb),
            ("logging.max_total_size_mb", self.max_total_size_mb),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.max_total_size_mb < self.max_size_mb {
            return Err(ConfigError::Invalid {
                field: "logging.max_total_size_mb",
                reason: "must not be smaller than logging.max_size_mb".to_string(),
            });
        }

        Ok(())
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn level() -> String {
        "debug".to_string()
    }

    pub fn directory() -> PathBuf {
        PathBuf::from("/var/log/mailrelay")
    }

    pub fn name() -> String {
        "mailrelay".to_string()
    }

    pub const fn buffer_size() -> usize {
        8192
    }

    pub const fn max_size_mb() -> u64 {
        100
    }

    pub const fn max_total_size_mb() -> u64 {
        1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path() {
        let config = LoggingConfig {
            directory: PathBuf::from("/tmp/relay"),
            name: "relay".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(config.file_path(), PathBuf::from("/tmp/relay/relay.log"));
    }

    #[test]
    fn test_level_filter() {
        let config = LoggingConfig {
            level: "warn".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(config.level_filter().ok(), Some(LevelFilter::WARN));

        let config = LoggingConfig {
            level: "chatty".to_string(),
            ..LoggingConfig::default()
        };
        assert!(config.level_filter().is_err());
    }

    #[test]
    fn test_stderr_skips_file_checks() {
        let config = LoggingConfig {
            destination: LogDestination::Stderr,
            directory: PathBuf::new(),
            buffer_size: 0,
            ..LoggingConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_total_cap_below_file_cap() {
        let config = LoggingConfig {
            max_size_mb: 50,
            max_total_size_mb: 10,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "logging.max_total_size_mb",
                ..
            })
        ));
    }
}
