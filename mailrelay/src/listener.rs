use std::{io, net::SocketAddr, time::Duration};

use futures_util::future::join_all;
use mailrelay_common::{SharedConfig, internal, tracing};
use mailrelay_tracing::traced;
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{delivery::DeliveryEngine, session::Session};

/// Pause after a failed accept. Errors like EMFILE persist until some other
/// connection closes.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections on the internal socket and hands each to its own
/// [`Session`] task.
pub struct Listener {
    listener: TcpListener,
    config: SharedConfig,
    engine: DeliveryEngine,
}

impl Listener {
    /// Bind the internal socket.
    ///
    /// # Errors
    ///
    /// If the address cannot be resolved or bound.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: SharedConfig,
        engine: DeliveryEngine,
    ) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            config,
            engine,
        })
    }

    /// # Errors
    ///
    /// If the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` fires, then wait for every session still
    /// running. Sessions see the same token, so they stop waiting between
    /// retries as soon as it fires.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "s"))]
    pub async fn serve(self, shutdown: CancellationToken) {
        let address = self
            .listener
            .local_addr()
            .map_or_else(|_| "<unknown>".to_string(), |addr| addr.to_string());
        internal!(level = INFO, "Listening on {address}");

        let mut sessions: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,

                connection = self.listener.accept() => {
                    let (stream, peer) = match connection {
                        Ok(connection) => connection,
                        Err(err) => {
                            if shutdown.is_cancelled() {
                                break;
                            }
                            internal!(level = ERROR, "Failed to accept connection: {err}");
                            if back_off(&shutdown).await {
                                continue;
                            }
                            break;
                        }
                    };

                    tracing::debug!("Connection received on {address} from {peer}");

                    sessions.retain(|session| !session.is_finished());

                    let session = Session::new(
                        stream,
                        peer,
                        self.config.clone(),
                        self.engine.clone(),
                        shutdown.clone(),
                    );

                    sessions.push(tokio::spawn(async move {
                        match session.run().await {
                            Ok(outcome) => {
                                tracing::debug!(peer = %peer, ?outcome, "Session finished");
                            }
                            Err(err) => internal!(level = ERROR, peer = %peer, "Session error: {err}"),
                        }
                    }));
                }
            }
        }

        internal!(
            level = INFO,
            "Listener {address} received shutdown signal, finishing {} sessions ...",
            sessions.len()
        );
        join_all(sessions).await;
    }
}

/// Wait out [`ACCEPT_BACKOFF`]. Returns `false` if shutdown arrived first.
async fn back_off(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;

        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}
