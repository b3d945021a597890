//! SMTP submission client.
//!
//! The client speaks just enough of RFC 5321 to hand one message to a
//! submission server: greeting, EHLO, STARTTLS (RFC 3207), AUTH PLAIN
//! (RFC 4616), MAIL, RCPT, DATA and QUIT. Checking response codes and
//! bounding each step in time is left to the caller.
//!
//! ```no_run
//! use mailrelay_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), mailrelay_smtp::client::ClientError> {
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com").await?;
//! client.read_greeting().await?.expect(&[220])?;
//! client.ehlo("relay.example.com").await?.expect(&[250])?;
//! client.starttls().await?;
//! client.ehlo("relay.example.com").await?.expect(&[250])?;
//! client.auth_plain("user", "secret").await?.expect(&[235])?;
//!
//! let message = MessageBuilder::new()
//!     .from("user@example.com")
//!     .to("friend@example.org")
//!     .subject("Hello")
//!     .body("Hi there")
//!     .build();
//!
//! client.mail_from("user@example.com").await?.expect(&[250])?;
//! client.rcpt_to("friend@example.org").await?.expect(&[250, 251])?;
//! client.data().await?.expect(&[354])?;
//! client.send_data(&message).await?.expect(&[250])?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::{MessageBuilder, dot_stuff};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
