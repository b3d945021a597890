//! A local mail relay.
//!
//! Clients on the host write one JSON request per connection to the internal
//! socket and disconnect. The relay delivers each request to an
//! authenticated upstream SMTP provider over STARTTLS, retrying a bounded
//! number of times with a fixed delay. Nothing is ever written back to the
//! client.
//!
//! - [`listener`] accepts connections and spawns a [`session`] for each
//! - [`delivery`] retries a [`transport`] under a [`context`] that carries
//!   shutdown and the request deadline
//! - [`controller`] turns process signals into reloads and a bounded shutdown
//! - [`sendmail`] is the submission side used by the `mailrelay-sendmail`
//!   binary
//! - [`submitf`] is the HTTP contact form adapter behind `mailrelay-submitf`

pub mod context;
pub mod controller;
pub mod delivery;
pub mod error;
pub mod listener;
pub mod sendmail;
pub mod session;
pub mod submitf;
pub mod transport;

pub use crate::{
    controller::Controller,
    delivery::{DeliveryEngine, DeliveryOutcome, RetryPolicy},
    listener::Listener,
    transport::{Message, SmtpTransport, Transport},
};
