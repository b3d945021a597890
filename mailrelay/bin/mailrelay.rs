use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use mailrelay::{Controller, DeliveryEngine, Listener, SmtpTransport, controller};
use mailrelay_common::{
    Config, SharedConfig,
    config::{self, LoggingConfig},
    internal,
    logging::Logging,
};

#[cfg(not(unix))]
compile_error!("Only unix targets are currently supported");

/// Relays JSON mail requests from a local socket to an SMTP provider
#[derive(Parser, Debug)]
#[command(name = "mailrelay", version)]
struct Cli {
    /// Configuration file [default: $MAILRELAY_CONFIG, then /usr/local/etc/mailrelay/mailrelay.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let path = config::locate(cli.config.as_deref());

    let loaded = Config::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let logging = init_logging(&loaded.config.logging)?;

    if loaded.existed {
        internal!(level = INFO, "Configuration loaded from {}", path.display());
    } else {
        match loaded.config.save(&path) {
            Ok(()) => internal!(
                level = INFO,
                "No configuration found, wrote defaults to {}",
                path.display()
            ),
            Err(err) => internal!(level = WARN, "Running with defaults; {err}"),
        }
    }

    let result = run(path, loaded.config, logging.clone()).await;

    // A clean run has already flushed within its own deadline.
    if let Err(err) = &result {
        internal!(level = ERROR, "{err:#}");
        controller::flush_logs(&logging, controller::FLUSH_TIMEOUT).await;
    }

    result
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<Logging> {
    Logging::init(config).context("Failed to initialise logging")
}

async fn run(path: PathBuf, config: Config, logging: Logging) -> anyhow::Result<()> {
    let address = config.server.internal_addr.clone();
    let shared = SharedConfig::new(config);
    let engine = DeliveryEngine::new(Arc::new(SmtpTransport));

    let listener = Listener::bind(address.as_str(), shared.clone(), engine)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    let signals = controller::listen_for_signals().context("Failed to install signal handlers")?;

    Controller::new(path, shared, logging)
        .run(listener, signals)
        .await
}
