//! The process-wide configuration handle.

use std::sync::Arc;

use tokio::sync::watch;

use super::Config;

/// Holds the active [`Config`] as an immutable, reference-counted snapshot.
///
/// Readers take a snapshot once per request and keep using it; a reload
/// publishes a whole new value and never touches the one readers hold.
#[derive(Clone)]
pub struct SharedConfig {
    sender: Arc<watch::Sender<Arc<Config>>>,
}

impl SharedConfig {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (sender, _receiver) = watch::channel(Arc::new(config));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// The configuration active right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Config> {
        self.sender.borrow().clone()
    }

    /// Publish `config` and return the snapshot it replaced.
    pub fn replace(&self, config: Config) -> Arc<Config> {
        self.sender.send_replace(Arc::new(config))
    }
}

impl std::fmt::Debug for SharedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedConfig")
            .field(&self.snapshot())
            .finish()
    }
}
