//! Hands one message to the upstream provider.
//!
//! [`SmtpTransport`] runs a complete submission per call: connect, greeting,
//! EHLO, STARTTLS with a TLS 1.2 floor, EHLO again, AUTH PLAIN, MAIL, RCPT,
//! DATA and QUIT. Each step is bounded by the matching `smtp.timeouts` value.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use mailrelay_common::{EmailRequest, config::SmtpConfig, internal, tracing};
use mailrelay_smtp::{ClientError, MessageBuilder, SmtpClient};
use mailrelay_tracing::traced;

use crate::error::{Stage, TransportError};

/// A rendered message and its envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub recipient: String,
    /// RFC 5322 headers and body, CRLF terminated, not dot-stuffed.
    pub data: Vec<u8>,
}

impl Message {
    /// Render `request` as a plain-text message sent by `from`.
    #[must_use]
    pub fn from_request(request: &EmailRequest, from: &str) -> Self {
        let data = MessageBuilder::new()
            .from(from)
            .to(&request.recipient)
            .subject(&request.subject)
            .body(request.body.clone())
            .build();

        Self {
            from: from.to_string(),
            recipient: request.recipient.clone(),
            data,
        }
    }
}

/// Something that can deliver a [`Message`] once.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Make a single delivery attempt.
    ///
    /// # Errors
    ///
    /// Any failure along the way; the caller decides whether to try again.
    async fn send(&self, message: &Message, config: &SmtpConfig) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpTransport;

impl SmtpTransport {
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(server = %config.address(), recipient = %message.recipient)), timing(precision = "ms"))]
    async fn submit(&self, message: &Message, config: &SmtpConfig) -> Result<(), TransportError> {
        let timeouts = &config.timeouts;

        let mut client = bounded(
            Stage::Connect,
            timeouts.connect(),
            SmtpClient::connect(config.address(), config.host.clone()),
        )
        .await?;

        bounded(Stage::Connect, timeouts.command(), async {
            client.read_greeting().await?.expect(&[220])
        })
        .await?;

        bounded(Stage::Handshake, timeouts.command(), async {
            let ehlo = client.ehlo(&config.helo_name).await?.expect(&[250])?;
            if !ehlo.advertises("STARTTLS") {
                return Err(ClientError::TlsError(
                    "Server does not offer STARTTLS".to_string(),
                ));
            }
            client.starttls().await?;
            client.ehlo(&config.helo_name).await?.expect(&[250])
        })
        .await?;

        internal!(level = DEBUG, "TLS established");

        bounded(Stage::Authenticate, timeouts.command(), async {
            client
                .auth_plain(&config.auth_user, &config.auth_pass)
                .await?
                .expect(&[235])
        })
        .await?;

        bounded(Stage::Transmit, timeouts.command(), async {
            client.mail_from(&message.from).await?.expect(&[250])?;
            client.rcpt_to(&message.recipient).await?.expect(&[250, 251])?;
            client.data().await?.expect(&[354])
        })
        .await?;

        bounded(Stage::Transmit, timeouts.data(), async {
            client.send_data(&message.data).await?.expect(&[250])
        })
        .await?;

        // The message is accepted at this point; a failed QUIT changes nothing.
        match tokio::time::timeout(timeouts.command(), client.quit()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::debug!("QUIT failed after delivery: {err}"),
            Err(_) => tracing::debug!("QUIT timed out after delivery"),
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, message: &Message, config: &SmtpConfig) -> Result<(), TransportError> {
        self.submit(message, config).await
    }
}

/// Run `step` within `limit`, labelling any failure with `stage`.
async fn bounded<T>(
    stage: Stage,
    limit: Duration,
    step: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, step)
        .await
        .unwrap_or(Err(ClientError::Timeout(limit)))
        .map_err(|source| TransportError::new(stage, source))
}
