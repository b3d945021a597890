//! The sendmail-compatible submission client.
//!
//! Reads a message on standard input in the usual sendmail shape, header
//! lines, a blank line, then the body, and hands it to the relay's internal
//! socket as one JSON request. Delivery happens later, in the relay; a zero
//! exit status only means the relay took the request.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use mailrelay_common::{EmailRequest, tracing};
use tokio::{io::AsyncWriteExt, net::TcpStream};

use crate::error::{ComposeError, SubmitError};

/// Exit statuses, as in `sysexits.h`.
pub mod exit {
    pub const OK: u8 = 0;
    pub const USAGE: u8 = 64;
    pub const NO_USER: u8 = 67;
    pub const UNAVAILABLE: u8 = 69;
    pub const TEMP_FAIL: u8 = 75;
}

pub const DEFAULT_SUBJECT: &str = "Message from mailrelay-sendmail";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(
    name = "mailrelay-sendmail",
    version,
    about = "Submit a message to the local mailrelay daemon"
)]
pub struct Args {
    /// Sender address. Accepted for compatibility; the relay always sends as
    /// its configured address.
    #[arg(short = 'f', value_name = "FROM")]
    pub from: Option<String>,

    /// Take the recipient from the `To:` header.
    #[arg(short = 't')]
    pub use_headers: bool,

    /// Do not treat a line holding a single `.` as the end of input.
    #[arg(short = 'i')]
    pub ignore_dots: bool,

    /// Subject, overriding any `Subject:` header.
    #[arg(short = 's', value_name = "SUBJECT")]
    pub subject: Option<String>,

    /// Operating mode: `m` delivers; `p`, `i`, `h` and `purg` report an empty
    /// queue.
    #[arg(short = 'b', value_name = "MODE", default_value = "m")]
    pub mode: String,

    /// Configuration file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Recipient address. Only the first is used.
    #[arg(value_name = "RECIPIENT")]
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Deliver,
    /// Any of the queue and alias maintenance modes; there is no queue.
    Maintenance,
}

impl Args {
    /// # Errors
    ///
    /// The unrecognised mode.
    pub fn mode(&self) -> Result<Mode, String> {
        match self.mode.as_str() {
            "m" => Ok(Mode::Deliver),
            "p" | "i" | "h" | "purg" => Ok(Mode::Maintenance),
            other => Err(other.to_string()),
        }
    }

    /// Build the request for `message` from these arguments.
    ///
    /// The recipient comes from the `To:` header with `-t`, otherwise from
    /// the first positional argument. The subject is `-s`, then the
    /// `Subject:` header, then [`DEFAULT_SUBJECT`].
    ///
    /// # Errors
    ///
    /// If no recipient can be found.
    pub fn compose(&self, message: &ParsedMessage) -> Result<EmailRequest, ComposeError> {
        let recipient = if self.use_headers {
            message
                .header("To")
                .filter(|to| !to.is_empty())
                .ok_or(ComposeError::NoHeaderRecipient)?
                .to_string()
        } else {
            self.recipients
                .first()
                .filter(|to| !to.is_empty())
                .ok_or(ComposeError::NoRecipient)?
                .clone()
        };

        let subject = self
            .subject
            .as_deref()
            .filter(|subject| !subject.is_empty())
            .or_else(|| message.header("Subject").filter(|subject| !subject.is_empty()))
            .unwrap_or(DEFAULT_SUBJECT);

        let end = message
            .body
            .iter()
            .rposition(|byte| *byte != b'\n')
            .map_or(0, |last| last + 1);

        Ok(EmailRequest {
            recipient,
            subject: subject.to_string(),
            body: message.body[..end].to_vec(),
        })
    }
}

/// Headers and body read from standard input.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedMessage {
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedMessage {
    /// Split `input` into headers and body.
    ///
    /// Lines up to the first blank one are `Name: value` headers; lines
    /// without a colon there are skipped. When the very first line is not a
    /// header the input has no header block and all of it is body. Body lines
    /// are kept with `\n` endings. Unless `ignore_dots` is set, a line holding
    /// only `.` ends the input.
    #[must_use]
    pub fn parse(input: &[u8], ignore_dots: bool) -> Self {
        let mut message = Self::default();

        if input.is_empty() {
            return message;
        }

        let mut lines = input
            .strip_suffix(b"\n")
            .unwrap_or(input)
            .split(|byte| *byte == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .peekable();

        let mut in_headers = lines
            .peek()
            .is_some_and(|first| first.is_empty() || first.contains(&b':'));

        for line in lines {
            if in_headers {
                if line.is_empty() {
                    in_headers = false;
                } else if let Some(colon) = line.iter().position(|byte| *byte == b':') {
                    let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
                    let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
                    message.headers.push((name, value));
                }
                continue;
            }

            if !ignore_dots && line == b"." {
                break;
            }

            message.body.extend_from_slice(line);
            message.body.push(b'\n');
        }

        message
    }

    /// The last value given for `name`, compared without regard to case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Write `request` to the relay listening on `addr`, as one JSON line.
///
/// # Errors
///
/// If the relay cannot be reached within 30 seconds or the write does not
/// finish within 5.
pub async fn submit(request: &EmailRequest, addr: &str) -> Result<(), SubmitError> {
    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');

    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| SubmitError::ConnectTimeout {
            addr: addr.to_string(),
            after: CONNECT_TIMEOUT,
        })?
        .map_err(|source| SubmitError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    tracing::debug!(relay = addr, bytes = payload.len(), "Submitting request");

    tokio::time::timeout(WRITE_TIMEOUT, async {
        stream.write_all(&payload).await?;
        stream.shutdown().await
    })
    .await
    .map_err(|_| SubmitError::WriteTimeout(WRITE_TIMEOUT))?
    .map_err(SubmitError::Write)
}
