//! The submission session: plain TCP until STARTTLS, rustls after.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use mailrelay_common::{incoming, outgoing, tracing};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{ClientConfig, RootCertStore, pki_types::ServerName, version},
};

use super::{
    error::{ClientError, Result},
    message::dot_stuff,
    response::Response,
};

/// Replies larger than this are treated as a protocol error.
const MAX_REPLY_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;

enum Channel {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Channel {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
            Self::Tls(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Append whatever is available to `into`. End of stream is an error:
    /// a server never closes in the middle of a reply we are waiting for.
    async fn read_some(&mut self, into: &mut Vec<u8>) -> Result<()> {
        let read = match self {
            Self::Plain(stream) => stream.read_buf(into).await?,
            Self::Tls(stream) => stream.read_buf(into).await?,
        };

        if read == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(())
    }

    /// TLS 1.2 or 1.3 only, verified against the platform trust store.
    async fn secure(self, server_name: &str) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::TlsError("TLS is already active".to_string()));
        };

        let native = rustls_native_certs::load_native_certs();
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        if ignored > 0 || !native.errors.is_empty() {
            tracing::warn!(ignored, errors = ?native.errors, "Skipped unusable trust roots");
        }
        tracing::trace!(added, "Trust roots loaded");

        let config =
            ClientConfig::builder_with_protocol_versions(&[&version::TLS13, &version::TLS12])
                .with_root_certificates(roots)
                .with_no_client_auth();

        let name = ServerName::try_from(server_name.to_string())
            .map_err(|err| ClientError::TlsError(format!("Invalid server name: {err}")))?;

        let stream = TlsConnector::from(Arc::new(config))
            .connect(name, stream)
            .await
            .map_err(|err| ClientError::TlsError(err.to_string()))?;

        Ok(Self::Tls(Box::new(stream)))
    }
}

/// One submission session.
///
/// Command methods return the server's reply whatever its code; callers use
/// [`Response::expect`] to require the code a step needs.
pub struct SmtpClient {
    channel: Option<Channel>,
    pending: Vec<u8>,
    server_name: String,
}

impl SmtpClient {
    /// Connect to `addr`. After STARTTLS the certificate must be valid for
    /// `server_name`.
    ///
    /// # Errors
    ///
    /// If the TCP connection cannot be made.
    pub async fn connect(addr: impl ToSocketAddrs, server_name: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            channel: Some(Channel::Plain(stream)),
            pending: Vec::with_capacity(READ_CHUNK),
            server_name: server_name.into(),
        })
    }

    /// # Errors
    ///
    /// If the read fails or the greeting is malformed.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_response().await
    }

    /// Send `line` followed by CRLF and read the reply.
    ///
    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn command(&mut self, line: &str) -> Result<Response> {
        outgoing!("{line}");
        self.write_line(line).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn ehlo(&mut self, helo_name: &str) -> Result<Response> {
        self.command(&format!("EHLO {helo_name}")).await
    }

    /// Ask for STARTTLS and perform the handshake once the server agrees
    /// with 220.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnexpectedResponse`] when refused, in which case the
    /// session stays in plain text; [`ClientError::TlsError`] when the
    /// handshake fails.
    pub async fn starttls(&mut self) -> Result<Response> {
        let reply = self.command("STARTTLS").await?.expect(&[220])?;

        // Bytes received before the handshake are unauthenticated.
        if !self.pending.is_empty() {
            return Err(ClientError::TlsError(
                "Server sent data after accepting STARTTLS".to_string(),
            ));
        }

        let plain = self.channel.take().ok_or(ClientError::ConnectionClosed)?;
        self.channel = Some(plain.secure(&self.server_name).await?);

        Ok(reply)
    }

    /// Single-step AUTH PLAIN (RFC 4616). The credentials never reach the
    /// log.
    ///
    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));

        outgoing!("AUTH PLAIN <redacted>");
        self.write_line(&format!("AUTH PLAIN {token}")).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn mail_from(&mut self, sender: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{sender}>")).await
    }

    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn rcpt_to(&mut self, recipient: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{recipient}>")).await
    }

    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Send `message` after DATA was accepted: dot-stuffed, CRLF terminated,
    /// then the lone `.` line.
    ///
    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn send_data(&mut self, message: &[u8]) -> Result<Response> {
        let mut payload = dot_stuff(message);
        if !payload.is_empty() && !payload.ends_with(b"\r\n") {
            payload.extend_from_slice(b"\r\n");
        }
        payload.extend_from_slice(b".\r\n");

        outgoing!(bytes = payload.len(), "<message data>");
        self.channel_mut()?.write_all(&payload).await?;
        self.read_response().await
    }

    /// # Errors
    ///
    /// On I/O failure or a malformed reply.
    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    fn channel_mut(&mut self) -> Result<&mut Channel> {
        self.channel.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut bytes = Vec::with_capacity(line.len() + 2);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        self.channel_mut()?.write_all(&bytes).await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((reply, used)) = Response::parse_response(&self.pending)? {
                self.pending.drain(..used);
                incoming!("{} {}", reply.code, reply.message());
                return Ok(reply);
            }

            if self.pending.len() >= MAX_REPLY_BYTES {
                return Err(ClientError::ParseError(format!(
                    "Reply exceeds {MAX_REPLY_BYTES} bytes"
                )));
            }

            let channel = self.channel.as_mut().ok_or(ClientError::ConnectionClosed)?;
            channel.read_some(&mut self.pending).await?;
        }
    }
}
