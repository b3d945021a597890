//! One accepted connection: read a request, deliver it, close.

use std::{net::SocketAddr, time::Duration};

use mailrelay_common::{EmailRequest, SharedConfig, incoming, tracing};
use mailrelay_tracing::traced;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;

use crate::{
    context::RequestContext,
    delivery::{DeliveryEngine, DeliveryOutcome},
    error::SessionError,
};

const READ_CHUNK: usize = 8 * 1024;

/// Requests up to this size are parsed after every read. Beyond it a parse
/// waits for a closing brace or for the buffer to double.
const EAGER_PARSE_BYTES: usize = 64 * 1024;

pub struct Session {
    stream: TcpStream,
    peer: SocketAddr,
    config: SharedConfig,
    engine: DeliveryEngine,
    shutdown: CancellationToken,
}

impl Session {
    #[must_use]
    pub const fn new(
        stream: TcpStream,
        peer: SocketAddr,
        config: SharedConfig,
        engine: DeliveryEngine,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stream,
            peer,
            config,
            engine,
            shutdown,
        }
    }

    /// Decode one request and deliver it under a single configuration
    /// snapshot. Nothing is ever written back; the connection closes when
    /// this returns.
    ///
    /// # Errors
    ///
    /// If no valid request arrives before the limits, the timeout or
    /// shutdown, or the delivery task panics.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(peer = %self.peer)), timing(precision = "ms"))]
    pub async fn run(mut self) -> Result<DeliveryOutcome, SessionError> {
        let config = self.config.snapshot();
        let server = &config.server;

        let request = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => return Err(SessionError::Cancelled),
            request = read_request(&mut self.stream, server.max_request_bytes, server.timeout()) => request?,
        };

        incoming!(
            level = INFO,
            peer = %self.peer,
            recipient = %request.recipient,
            subject = %request.subject,
            body_bytes = request.body.len(),
            "Received email request"
        );

        let context = RequestContext::new(&self.shutdown, server.timeout());
        let engine = self.engine.clone();
        let delivery = tokio::spawn(async move { engine.deliver(&request, &config, &context).await });

        Ok(delivery.await?)
    }
}

/// Read and decode the first JSON value from `reader`.
///
/// Reading stops as soon as one complete value has arrived, so anything the
/// client sends after it is never looked at, or as soon as the input can no
/// longer become a request. End of stream also ends the request. At most `limit` bytes are read, all within `timeout`.
///
/// # Errors
///
/// On I/O failure, timeout, an oversized or empty request, or a value that
/// is not a valid request.
pub async fn read_request<R>(
    reader: R,
    limit: u64,
    timeout: Duration,
) -> Result<EmailRequest, SessionError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, decode_first(reader, limit))
        .await
        .map_err(|_| SessionError::TimedOut(timeout))?
}

async fn decode_first<R>(reader: R, limit: u64) -> Result<EmailRequest, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = reader.take(limit);
    let mut buffer = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut parsed_at: usize = 0;

    loop {
        let read = reader.read(&mut chunk).await?;

        if read == 0 {
            if buffer.iter().all(u8::is_ascii_whitespace) {
                return Err(SessionError::Empty);
            }
            if buffer.len() as u64 >= limit {
                return Err(SessionError::TooLarge { limit });
            }

            return match first_value(&buffer) {
                Some(request) => Ok(request?),
                None => Err(SessionError::Empty),
            };
        }

        buffer.extend_from_slice(&chunk[..read]);

        let due = buffer.len() <= EAGER_PARSE_BYTES
            || buffer.len() >= parsed_at.saturating_mul(2)
            || chunk[..read].contains(&b'}');
        if !due {
            continue;
        }
        parsed_at = buffer.len();

        // Only running out of input means "wait for more".
        match first_value(&buffer) {
            Some(Err(err)) if err.is_eof() => {}
            Some(request) => return Ok(request?),
            None => {}
        }
    }
}

fn first_value(buffer: &[u8]) -> Option<Result<EmailRequest, serde_json::Error>> {
    serde_json::Deserializer::from_slice(buffer)
        .into_iter::<EmailRequest>()
        .next()
}
