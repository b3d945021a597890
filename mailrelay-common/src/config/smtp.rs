//! Upstream SMTP provider settings.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Credentials and addressing for the upstream submission server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Hostname of the provider; also used as the TLS server name.
    #[serde(default = "defaults::host")]
    pub host: String,

    /// Submission port. STARTTLS is always negotiated on it.
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Envelope sender and `From:` header of every relayed message.
    #[serde(default = "defaults::from_addr")]
    pub from_addr: String,

    #[serde(default = "defaults::auth_user")]
    pub auth_user: String,

    #[serde(default = "defaults::auth_pass")]
    pub auth_pass: String,

    /// Name announced in EHLO.
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
            from_addr: defaults::from_addr(),
            auth_user: defaults::auth_user(),
            auth_pass: defaults::auth_pass(),
            helo_name: defaults::helo_name(),
            timeouts: SmtpTimeouts::default(),
        }
    }
}

// The password never reaches a log line.
impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from_addr", &self.from_addr)
            .field("auth_user", &self.auth_user)
            .field("auth_pass", &"<redacted>")
            .field("helo_name", &self.helo_name)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl SmtpConfig {
    /// `host:port`, as handed to the TCP connector.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("smtp.host", &self.host),
            ("smtp.from_addr", &self.from_addr),
            ("smtp.auth_user", &self.auth_user),
            ("smtp.auth_pass", &self.auth_pass),
            ("smtp.helo_name", &self.helo_name),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::MissingField(*field));
        }

        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "smtp.port",
                reason: "must be greater than zero".to_string(),
            });
        }

        self.timeouts.validate()
    }
}

/// Per-stage deadlines for one upstream SMTP session.
///
/// These bound each network step of an attempt. They are independent of the
/// relay's cancellation signal, so an attempt already on the wire finishes or
/// times out on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// TCP connect plus TLS handshake.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Each command/response exchange (EHLO, STARTTLS, AUTH, MAIL, RCPT, QUIT).
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// Message transfer, from the end of DATA to the final reply.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            command_secs: defaults::command_secs(),
            data_secs: defaults::data_secs(),
        }
    }
}

impl SmtpTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("smtp.timeouts.connect_secs", self.connect_secs),
            ("smtp.timeouts.command_secs", self.command_secs),
            ("smtp.timeouts.data_secs", self.data_secs),
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
    pub fn host() -> String {
        "smtp.gmail.com".to_string()
    }

    pub const fn port() -> u16 {
        587
    }

    pub fn from_addr() -> String {
        "user@example.com".to_string()
    }

    pub fn auth_user() -> String {
        "user@example.com".to_string()
    }

    pub fn auth_pass() -> String {
        "0123456789AB".to_string()
    }

    pub fn helo_name() -> String {
        "localhost".to_string()
    }

    pub const fn connect_secs() -> u64 {
        30
    }

    pub const fn command_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        120
    }
}
