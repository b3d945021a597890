//! Configuration for the mailrelay binaries.
//!
//! The document is TOML with three sections, `[smtp]`, `[server]` and
//! `[logging]`. Every field has a default, so an absent file or a partial one
//! both produce a complete [`Config`]; [`Config::validate`] then rejects empty
//! or non-positive required values before anything uses them.
//!
//! - [`smtp`]: upstream provider, credentials and per-stage timeouts
//! - [`server`]: internal socket, request deadline and retry policy
//! - [`logging`]: level, destination and file rotation
//! - [`shared`]: the atomically swapped snapshot read by in-flight requests

pub mod logging;
pub mod server;
pub mod shared;
pub mod smtp;

use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

pub use self::{
    logging::{LogDestination, LoggingConfig},
    server::ServerConfig,
    shared::SharedConfig,
    smtp::{SmtpConfig, SmtpTimeouts},
};
use crate::error::ConfigError;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MAILRELAY_CONFIG";

/// Location used when neither a flag nor [`CONFIG_ENV`] names a file.
pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/mailrelay/mailrelay.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A validated configuration and whether it came from an existing file.
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub existed: bool,
}

impl Config {
    /// Parse a TOML document over the defaults. Does not validate.
    ///
    /// # Errors
    /// If the document is not valid TOML or a field has the wrong type.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(document)?)
    }

    /// Load `path` over the defaults and validate the result.
    ///
    /// A missing file is not an error: the defaults are returned with
    /// `existed == false`, so the caller can decide whether to persist them.
    ///
    /// # Errors
    /// If the file exists but cannot be read or parsed, or the merged
    /// configuration is invalid.
    pub fn load(path: &Path) -> Result<Loaded, ConfigError> {
        let (config, existed) = match std::fs::read_to_string(path) {
            Ok(document) => (Self::from_toml(&document)?, true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => (Self::default(), false),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        config.validate()?;

        Ok(Loaded { config, existed })
    }

    /// Load `path`, which must exist, for a live reload.
    ///
    /// # Errors
    /// As [`Config::load`], and [`ConfigError::NotFound`] when the file is gone.
    pub fn reload(path: &Path) -> Result<Self, ConfigError> {
        let loaded = Self::load(path)?;
        if !loaded.existed {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        Ok(loaded.config)
    }

    /// Check every required field.
    ///
    /// # Errors
    /// The first empty or out-of-range field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.smtp.validate()?;
        self.server.validate()?;
        self.logging.validate()
    }

    /// Write this configuration to `path`, creating its directory.
    ///
    /// # Errors
    /// If serialisation fails or the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let document = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(path, document).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolve the configuration path: an explicit path first, then
/// [`CONFIG_ENV`], then [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn locate(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(
        || {
            std::env::var_os(CONFIG_ENV)
                .filter(|value| !value.is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
        },
        Path::to_path_buf,
    )
}
