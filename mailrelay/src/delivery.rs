//! Fixed-delay, bounded retry around a [`Transport`].

use std::{sync::Arc, time::Duration};

use mailrelay_common::{Config, EmailRequest, config::ServerConfig, internal, tracing};
use mailrelay_tracing::traced;

use crate::{
    context::{RequestContext, Wake},
    transport::{Message, Transport},
};

/// How many attempts a request gets and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Whether another attempt may follow `attempts` failed ones.
    #[must_use]
    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl From<&ServerConfig> for RetryPolicy {
    fn from(server: &ServerConfig) -> Self {
        Self::new(server.max_retries, server.retry_delay())
    }
}

/// How a delivery ended, and after how many transport attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The provider accepted the message.
    Delivered { attempts: u32 },
    /// Every allowed attempt failed.
    Exhausted { attempts: u32 },
    /// Shutdown arrived while waiting to retry.
    Cancelled { attempts: u32 },
    /// The request deadline passed while waiting to retry.
    TimedOut { attempts: u32 },
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts }
            | Self::Exhausted { attempts }
            | Self::Cancelled { attempts }
            | Self::TimedOut { attempts } => *attempts,
        }
    }

    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Runs deliveries against a shared transport.
#[derive(Clone)]
pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Deliver `request` using the `config` snapshot it was accepted under.
    ///
    /// There is always at least one attempt. After a failure the engine
    /// waits `server.retry_delay_ms` and tries again, up to
    /// `server.max_retries` attempts in total. Only the wait reacts to
    /// `context`: an attempt in progress is never interrupted, but no new one
    /// starts once the request is cancelled or past its deadline.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(recipient = %request.recipient)), timing(precision = "ms"))]
    pub async fn deliver(
        &self,
        request: &EmailRequest,
        config: &Config,
        context: &RequestContext,
    ) -> DeliveryOutcome {
        let message = Message::from_request(request, &config.smtp.from_addr);
        let policy = RetryPolicy::from(&config.server);
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.transport.send(&message, &config.smtp).await {
                Ok(()) => {
                    internal!(
                        level = INFO,
                        subject = %request.subject,
                        attempts,
                        "Email sent successfully"
                    );
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(err) if !policy.should_retry(attempts) => {
                    internal!(
                        level = ERROR,
                        attempts,
                        "Giving up on delivery: {err}"
                    );
                    return DeliveryOutcome::Exhausted { attempts };
                }
                Err(err) => {
                    internal!(
                        level = WARN,
                        attempts,
                        "Delivery attempt failed, retrying in {:?}: {err}",
                        policy.delay
                    );
                }
            }

            match context.sleep(policy.delay).await {
                Wake::Elapsed => {}
                Wake::Cancelled => {
                    internal!(
                        level = WARN,
                        attempts,
                        "Delivery cancelled by shutdown"
                    );
                    return DeliveryOutcome::Cancelled { attempts };
                }
                Wake::DeadlineExceeded => {
                    internal!(
                        level = ERROR,
                        attempts,
                        "Delivery deadline passed before the next attempt"
                    );
                    return DeliveryOutcome::TimedOut { attempts };
                }
            }
        }
    }
}

impl std::fmt::Debug for DeliveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mailrelay_common::config::SmtpConfig;
    use mailrelay_smtp::ClientError;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::{Stage, TransportError};

    /// Fails the first `failures` calls, then succeeds, recording call times.
    struct ScriptedTransport {
        failures: u32,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _: &Message, _: &SmtpConfig) -> Result<(), TransportError> {
            let count = {
                let Ok(mut calls) = self.calls.lock() else {
                    return Err(TransportError::new(Stage::Connect, ClientError::ConnectionClosed));
                };
                calls.push(Instant::now());
                calls.len()
            };

            if count as u32 <= self.failures {
                Err(TransportError::new(Stage::Transmit, ClientError::ConnectionClosed))
            } else {
                Ok(())
            }
        }
    }

    fn config(max_retries: u32, retry_delay_ms: u64, timeout_secs: u64) -> Config {
        let mut config = Config::default();
        config.server.max_retries = max_retries;
        config.server.retry_delay_ms = retry_delay_ms;
        config.server.timeout_secs = timeout_secs;
        config
    }

    fn request() -> EmailRequest {
        EmailRequest::new("to@example.org", "subject", "body")
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_succeeds() {
        let transport = ScriptedTransport::new(0);
        let engine = DeliveryEngine::new(transport.clone());
        let config = config(3, 1000, 60);
        let context = RequestContext::new(&CancellationToken::new(), config.server.timeout());

        let outcome = engine.deliver(&request(), &config, &context).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let transport = ScriptedTransport::new(2);
        let engine = DeliveryEngine::new(transport.clone());
        let config = config(3, 1000, 60);
        let context = RequestContext::new(&CancellationToken::new(), config.server.timeout());

        let start = Instant::now();
        let outcome = engine.deliver(&request(), &config, &context).await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert!(start.elapsed() >= Duration::from_millis(2000));

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_max_retries() {
        let transport = ScriptedTransport::new(u32::MAX);
        let engine = DeliveryEngine::new(transport.clone());
        let config = config(3, 500, 60);
        let context = RequestContext::new(&CancellationToken::new(), config.server.timeout());

        let outcome = engine.deliver(&request(), &config, &context).await;

        assert_eq!(outcome, DeliveryOutcome::Exhausted { attempts: 3 });
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_attempts_once() {
        let transport = ScriptedTransport::new(u32::MAX);
        let engine = DeliveryEngine::new(transport.clone());
        let config = config(0, 500, 60);
        let context = RequestContext::new(&CancellationToken::new(), config.server.timeout());

        let outcome = engine.deliver(&request(), &config, &context).await;

        assert_eq!(outcome, DeliveryOutcome::Exhausted { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_wait() {
        let transport = ScriptedTransport::new(u32::MAX);
        let engine = DeliveryEngine::new(transport.clone());
        let config = config(3, 10_000, 600);
        let shutdown = CancellationToken::new();
        let context = RequestContext::new(&shutdown, config.server.timeout());

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let outcome = engine.deliver(&request(), &config, &context).await;

        assert_eq!(outcome, DeliveryOutcome::Cancelled { attempts: 1 });
        assert_eq!(transport.calls().len(), 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_retries() {
        let transport = ScriptedTransport::new(u32::MAX);
        let engine = DeliveryEngine::new(transport.clone());
        let config = config(10, 4000, 10);
        let context = RequestContext::new(&CancellationToken::new(), config.server.timeout());

        let outcome = engine.deliver(&request(), &config, &context).await;

        assert_eq!(outcome, DeliveryOutcome::TimedOut { attempts: 3 });
        assert_eq!(transport.calls().len(), 3);
    }

    #[test]
    fn test_policy_from_server_config() {
        let config = config(4, 250, 60);
        let policy = RetryPolicy::from(&config.server);

        assert_eq!(policy, RetryPolicy::new(4, Duration::from_millis(250)));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }
}
