//! A [`Transport`] that follows a script instead of talking SMTP.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mailrelay::{
    Message, Transport,
    error::{Stage, TransportError},
};
use mailrelay_common::config::SmtpConfig;
use mailrelay_smtp::ClientError;
use tokio::{sync::Notify, time::Instant};

/// Fails the first `failures` attempts and accepts every one after that.
pub struct ScriptedTransport {
    failures: usize,
    attempts: Mutex<Vec<(Instant, Message)>>,
    attempted: Notify,
}

impl ScriptedTransport {
    pub fn succeeding() -> Arc<Self> {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: Mutex::new(Vec::new()),
            attempted: Notify::new(),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().map_or(0, |attempts| attempts.len())
    }

    pub fn times(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .map(|attempts| attempts.iter().map(|(at, _)| *at).collect())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.attempts
            .lock()
            .map(|attempts| attempts.iter().map(|(_, message)| message.clone()).collect())
            .unwrap_or_default()
    }

    /// Resolves once an attempt has been made since the last call.
    pub async fn attempted(&self) {
        self.attempted.notified().await;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, message: &Message, _: &SmtpConfig) -> Result<(), TransportError> {
        let count = match self.attempts.lock() {
            Ok(mut attempts) => {
                attempts.push((Instant::now(), message.clone()));
                attempts.len()
            }
            Err(_) => usize::MAX,
        };
        self.attempted.notify_one();

        if count <= self.failures {
            Err(TransportError::new(
                Stage::Connect,
                ClientError::ConnectionClosed,
            ))
        } else {
            Ok(())
        }
    }
}
