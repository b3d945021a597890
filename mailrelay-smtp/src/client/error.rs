use std::{io, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server's reply does not follow the SMTP reply grammar.
    #[error("Malformed SMTP reply: {0}")]
    ParseError(String),

    /// The server answered with a status code the step does not accept.
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    #[error("TLS error: {0}")]
    TlsError(String),

    /// A step did not finish within its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Reply is not valid UTF-8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
