//! Error types for the relay.
//!
//! None of these ever reach a caller on the wire: session errors close the
//! connection, transport errors feed the retry loop, and submission errors
//! become the sendmail exit status.

use std::{fmt, io, time::Duration};

use mailrelay_smtp::ClientError;
use thiserror::Error;

/// The part of an SMTP exchange that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// TCP connect and greeting.
    Connect,
    /// EHLO, STARTTLS and the TLS handshake.
    Handshake,
    /// AUTH PLAIN.
    Authenticate,
    /// MAIL, RCPT, DATA and the message itself.
    Transmit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Authenticate => "authentication",
            Self::Transmit => "transmission",
        })
    }
}

/// One failed delivery attempt.
#[derive(Debug, Error)]
#[error("SMTP {stage} failed: {source}")]
pub struct TransportError {
    pub stage: Stage,
    #[source]
    pub source: ClientError,
}

impl TransportError {
    #[must_use]
    pub const fn new(stage: Stage, source: ClientError) -> Self {
        Self { stage, source }
    }
}

/// Why a connection produced no request.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to read request: {0}")]
    Read(#[from] io::Error),

    #[error("Request exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Request not received within {0:?}")]
    TimedOut(Duration),

    #[error("Connection closed before a request was sent")]
    Empty,

    #[error("Failed to decode request: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Shutdown began before a request was received")]
    Cancelled,

    #[error("Delivery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Why `mailrelay-sendmail` could not build a request from its input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("No recipient specified in headers")]
    NoHeaderRecipient,

    #[error("No recipient specified")]
    NoRecipient,
}

/// Failures handing a message to the relay's internal socket.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Failed to connect to relay at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out connecting to relay at {addr} after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },

    #[error("Failed to send request to relay: {0}")]
    Write(#[source] io::Error),

    #[error("Timed out sending request to relay after {0:?}")]
    WriteTimeout(Duration),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why a contact form submission was refused. The message is returned to
/// the browser as is.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("name is required")]
    MissingName,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("message is required")]
    MissingMessage,
}

/// Failures running the HTTP form adapter.
#[derive(Debug, Error)]
pub enum FormServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Form server failed: {0}")]
    Serve(#[source] io::Error),
}
