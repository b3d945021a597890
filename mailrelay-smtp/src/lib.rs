//! Client side of an authenticated SMTP submission: a STARTTLS-capable
//! [`client::SmtpClient`], response parsing and a plain-text message builder.

pub mod client;

pub use client::{ClientError, MessageBuilder, Response, SmtpClient};
