//! Error types for the mailrelay-common crate.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while loading, validating or persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Failed to read configuration from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration document is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialised for saving.
    #[error("Failed to serialise configuration: {0}")]
    Serialise(#[from] toml::ser::Error),

    /// The configuration (or its directory) could not be written.
    #[error("Failed to write configuration to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A reload was requested but there is no file to reload from.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A required field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field holds a value outside its allowed range.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised while building or swapping the logging stack.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured level is not one of trace, debug, info, warn, error, off.
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),

    /// The log directory or file could not be opened.
    #[error("Failed to open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A global subscriber is already installed.
    #[error("Failed to install log subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),

    /// The level filter could not be swapped.
    #[error("Failed to reload log level: {0}")]
    Reload(#[from] tracing_subscriber::reload::Error),
}
