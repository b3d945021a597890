pub mod harness;
pub mod transport;

pub use harness::{RelayHarness, log_line, logged};
pub use transport::ScriptedTransport;
