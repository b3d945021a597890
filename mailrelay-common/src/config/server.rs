//! Relay listener and delivery policy settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the internal JSON socket. Only trusted local processes
    /// should be able to reach it.
    #[serde(default = "defaults::internal_addr")]
    pub internal_addr: String,

    /// Address of the HTTP form adapter. Carried for adapters sharing this file.
    #[serde(default = "defaults::external_addr")]
    pub external_addr: String,

    /// Deadline for one request, from decode to the end of its last retry wait.
    ///
    /// Default: 180 seconds
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    /// Fixed pause between two delivery attempts.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound on delivery attempts per request, the first one included.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Largest request line accepted on the internal socket.
    ///
    /// Default: 10 MiB
    #[serde(default = "defaults::max_request_bytes")]
    pub max_request_bytes: u64,

    /// Origins the HTTP form adapter accepts. Unused by the relay itself.
    #[serde(default = "defaults::allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            internal_addr: defaults::internal_addr(),
            external_addr: defaults::external_addr(),
            timeout_secs: defaults::timeout_secs(),
            retry_delay_ms: defaults::retry_delay_ms(),
            max_retries: defaults::max_retries(),
            max_request_bytes: defaults::max_request_bytes(),
            allowed_origins: defaults::allowed_origins(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.internal_addr.trim().is_empty() {
            return Err(ConfigError::MissingField("server.internal_addr"));
        }

        for (field, value) in [
            ("server.timeout_secs", self.timeout_secs),
            ("server.retry_delay_ms", self.retry_delay_ms),
            ("server.max_retries", u64::from(self.max_retries)),
            ("server.max_request_bytes", self.max_request_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

mod defaults {
    pub fn internal_addr() -> String {
        "localhost:2525".to_string()
    }

    pub fn external_addr() -> String {
        "localhost:8845".to_string()
    }

    pub const fn timeout_secs() -> u64 {
        180
    }

    pub const fn retry_delay_ms() -> u64 {
        10_000
    }

    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn max_request_bytes() -> u64 {
        10 * 1024 * 1024
    }

    pub fn allowed_origins() -> Vec<String> {
        vec![
            "https://example.com".to_string(),
            "http://example.com".to_string(),
        ]
    }
}
