//! Process lifecycle: signal handling, live reload and bounded shutdown.

use std::{io, path::PathBuf, time::Duration};

use anyhow::Context;
use mailrelay_common::{Config, SharedConfig, Signal, internal, logging::Logging, tracing};
use mailrelay_tracing::traced;
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::listener::Listener;

/// How long the listener and its sessions get to finish after shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the final log flush may take.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Forward SIGHUP as [`Signal::Reload`] and SIGINT or SIGTERM as
/// [`Signal::Shutdown`].
///
/// # Errors
///
/// If a signal handler cannot be registered.
pub fn listen_for_signals() -> io::Result<mpsc::Receiver<Signal>> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let (sender, receiver) = mpsc::channel(8);

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = hangup.recv() => {
                    internal!(level = INFO, "SIGHUP received, reloading configuration");
                    Signal::Reload
                }
                Some(()) = interrupt.recv() => {
                    internal!(level = INFO, "SIGINT received, shutting down");
                    Signal::Shutdown
                }
                Some(()) = terminate.recv() => {
                    internal!(level = INFO, "Terminate signal received, shutting down");
                    Signal::Shutdown
                }
                else => break,
            };

            if sender.send(received).await.is_err() {
                break;
            }
        }
    });

    Ok(receiver)
}

/// Run `flush` on a thread of its own and wait at most `limit` for it.
///
/// A flush that never returns is left behind on its detached thread, so
/// neither the caller nor runtime shutdown waits for it.
///
/// # Errors
///
/// If the flush fails, panics, or is still running after `limit`.
pub async fn flush_within<F>(limit: Duration, flush: F) -> io::Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();

    std::thread::Builder::new()
        .name("log-flush".to_string())
        .spawn(move || {
            let _ = sender.send(flush());
        })?;

    match tokio::time::timeout(limit, receiver).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(io::Error::other("Log flush ended without a result")),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("Log flush did not finish within {limit:?}"),
        )),
    }
}

/// Flush `logging` within `limit`. Failures go to stderr.
pub async fn flush_logs(logging: &Logging, limit: Duration) {
    let logging = logging.clone();

    if let Err(err) = flush_within(limit, move || logging.flush()).await {
        eprintln!("Failed to flush logs: {err}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    /// Terminal.
    ShuttingDown,
}

/// Owns the shared configuration, the logging handle and the shutdown token,
/// and reacts to [`Signal`]s until shutdown completes.
#[derive(Debug)]
pub struct Controller {
    config_path: PathBuf,
    config: SharedConfig,
    logging: Logging,
    shutdown: CancellationToken,
    state: State,
    drain_timeout: Duration,
    flush_timeout: Duration,
}

impl Controller {
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>, config: SharedConfig, logging: Logging) -> Self {
        Self {
            config_path: config_path.into(),
            config,
            logging,
            shutdown: CancellationToken::new(),
            state: State::Running,
            drain_timeout: DRAIN_TIMEOUT,
            flush_timeout: FLUSH_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// The token cancelled when shutdown begins.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Serve `listener` and handle `signals` until a shutdown signal arrives,
    /// the signal stream ends, or the listener stops on its own.
    ///
    /// # Errors
    ///
    /// If the listener task panicked.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(
        &mut self,
        listener: Listener,
        mut signals: mpsc::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let mut serve = tokio::spawn(listener.serve(self.shutdown.clone()));

        internal!(level = INFO, "Controller running");

        loop {
            tokio::select! {
                received = signals.recv() => match received {
                    Some(Signal::Reload) => {
                        if let Err(err) = self.reload() {
                            internal!(
                                level = ERROR,
                                "Reload failed, keeping current configuration: {err:#}"
                            );
                        }
                    }
                    Some(Signal::Shutdown) | None => break,
                },

                result = &mut serve => {
                    internal!(level = WARN, "Listener stopped without a shutdown signal");
                    self.state = State::ShuttingDown;
                    self.shutdown.cancel();
                    flush_logs(&self.logging, self.flush_timeout).await;
                    return result.context("Listener task failed");
                }
            }
        }

        self.shut_down(serve).await;

        Ok(())
    }

    /// Load the configuration file again and make it active along with its
    /// logging settings. Requests already accepted keep the snapshot they
    /// started with.
    ///
    /// # Errors
    ///
    /// If the file is missing or invalid, or its logging destination cannot
    /// be opened. Nothing changes in that case.
    pub fn reload(&self) -> anyhow::Result<()> {
        let candidate = Config::reload(&self.config_path).with_context(|| {
            format!("Failed to load {}", self.config_path.display())
        })?;

        let prepared = Logging::prepare(&candidate.logging)
            .context("Failed to prepare logging for the new configuration")?;
        let level = prepared.level();
        self.logging.apply(prepared)?;

        let previous = self.config.replace(candidate);
        let current = self.config.snapshot();

        if previous.server.internal_addr != current.server.internal_addr {
            internal!(
                level = WARN,
                "server.internal_addr changed from {} to {}; the listener keeps its socket until restart",
                previous.server.internal_addr,
                current.server.internal_addr
            );
        }

        internal!(
            level = INFO,
            "Configuration reloaded from {}, logging at {level}",
            self.config_path.display()
        );

        Ok(())
    }

    async fn shut_down(&mut self, serve: JoinHandle<()>) {
        self.state = State::ShuttingDown;
        self.shutdown.cancel();

        match tokio::time::timeout(self.drain_timeout, serve).await {
            Ok(Ok(())) => internal!(level = INFO, "All sessions finished"),
            Ok(Err(err)) => internal!(level = ERROR, "Listener task failed: {err}"),
            Err(_) => internal!(
                level = WARN,
                "Sessions still running after {:?}, abandoning them",
                self.drain_timeout
            ),
        }

        flush_logs(&self.logging, self.flush_timeout).await;
    }
}
