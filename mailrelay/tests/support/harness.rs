//! Runs a relay listener in-process against a scripted transport, logging
//! to a file the tests can read back.

use std::{
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use mailrelay::{DeliveryEngine, Listener, Transport};
use mailrelay_common::{
    Config, EmailRequest, SharedConfig,
    config::LogDestination,
    logging::Logging,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// Log file shared by every test in this binary.
struct TestLog {
    directory: TempDir,
    logging: Logging,
}

fn test_log() -> Option<&'static TestLog> {
    static LOG: OnceLock<Option<TestLog>> = OnceLock::new();
    LOG.get_or_init(|| {
        let directory = tempfile::tempdir().ok()?;

        let mut config = Config::default().logging;
        config.destination = LogDestination::File;
        config.level = "debug".to_string();
        config.directory = directory.path().to_path_buf();
        config.name = "relay".to_string();

        let logging = Logging::init(&config).ok()?;
        Some(TestLog { directory, logging })
    })
    .as_ref()
}

/// Wait up to five seconds for a log line containing every one of `parts`.
pub async fn logged(parts: &[&str]) -> bool {
    log_line(parts).await.is_some()
}

/// The first log line containing every one of `parts`, waiting up to five
/// seconds for it to be written.
pub async fn log_line(parts: &[&str]) -> Option<String> {
    let log = test_log()?;
    let path = log.directory.path().join("relay.log");
    let deadline = Instant::now() + Duration::from_secs(5);

    loop {
        let _ = log.logging.flush();
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        if let Some(line) = content
            .lines()
            .find(|line| parts.iter().all(|part| line.contains(part)))
        {
            return Some(line.to_string());
        }

        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub struct RelayHarness {
    addr: SocketAddr,
    config: SharedConfig,
    shutdown: CancellationToken,
    serve: JoinHandle<()>,
}

impl RelayHarness {
    pub fn builder() -> RelayHarnessBuilder {
        RelayHarnessBuilder::default()
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Write `payload`, close the write half, and wait for the relay to close
    /// the connection. Returns whatever the relay wrote back.
    pub async fn send_raw(&self, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(self.addr)
            .await
            .expect("Failed to connect to relay");
        stream
            .write_all(payload)
            .await
            .expect("Failed to write request");
        stream.shutdown().await.expect("Failed to close write half");

        let mut reply = Vec::new();
        stream
            .read_to_end(&mut reply)
            .await
            .expect("Failed to read until close");
        reply
    }

    pub async fn send(&self, request: &EmailRequest) -> Vec<u8> {
        let mut payload = serde_json::to_vec(request).expect("Failed to encode request");
        payload.push(b'\n');
        self.send_raw(&payload).await
    }

    /// Cancel and wait for the listener and its sessions.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.serve)
            .await
            .expect("Listener did not drain in time")
            .expect("Listener task panicked");
    }
}

pub struct RelayHarnessBuilder {
    config: Config,
}

impl Default for RelayHarnessBuilder {
    fn default() -> Self {
        let mut config = Config::default();
        config.server.internal_addr = "127.0.0.1:0".to_string();
        config.server.retry_delay_ms = 100;

        Self { config }
    }
}

impl RelayHarnessBuilder {
    pub const fn with_retries(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.config.server.max_retries = max_retries;
        self.config.server.retry_delay_ms = retry_delay_ms;
        self
    }

    pub const fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.config.server.timeout_secs = timeout_secs;
        self
    }

    pub async fn build(self, transport: Arc<dyn Transport>) -> RelayHarness {
        test_log();

        let config = SharedConfig::new(self.config);
        let listener = Listener::bind("127.0.0.1:0", config.clone(), DeliveryEngine::new(transport))
            .await
            .expect("Failed to bind relay listener");
        let addr = listener.local_addr().expect("Listener has no address");

        let shutdown = CancellationToken::new();
        let serve = tokio::spawn(listener.serve(shutdown.clone()));

        RelayHarness {
            addr,
            config,
            shutdown,
            serve,
        }
    }
}
