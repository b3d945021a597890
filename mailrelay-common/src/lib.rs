//! Types shared by the relay daemon and its submission clients: the
//! configuration document, the logging stack and the JSON request that
//! travels over the internal socket.

pub mod config;
pub mod error;
pub mod logging;
pub mod request;

pub use tracing;

pub use crate::{
    config::{Config, SharedConfig},
    request::EmailRequest,
};

/// Process-level control signals understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Re-read the configuration and rebuild the logging sink.
    Reload,
    /// Stop accepting, drain, and exit.
    Shutdown,
}
