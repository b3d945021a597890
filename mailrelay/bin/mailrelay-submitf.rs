use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use mailrelay::{
    controller::{self, DRAIN_TIMEOUT, FLUSH_TIMEOUT},
    submitf::FormServer,
};
use mailrelay_common::{
    Config, Signal,
    config::{self, LoggingConfig},
    internal,
    logging::Logging,
};
use tokio_util::sync::CancellationToken;

#[cfg(not(unix))]
compile_error!("Only unix targets are currently supported");

/// Accepts contact form posts over HTTP and forwards them to mailrelay
#[derive(Parser, Debug)]
#[command(name = "mailrelay-submitf", version)]
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

    // Same directory as the relay, separate file: two processes must not
    // share one buffered, rotating sink.
    let logging = Logging::init(&LoggingConfig {
        name: format!("{}-submitf", loaded.config.logging.name),
        ..loaded.config.logging.clone()
    })
    .context("Failed to initialise logging")?;

    if !loaded.existed {
        match loaded.config.save(&path) {
            Ok(()) => internal!(
                level = INFO,
                "No configuration found, wrote defaults to {}",
                path.display()
            ),
            Err(err) => internal!(level = WARN, "Running with defaults; {err}"),
        }
    }

    let result = run(Arc::new(loaded.config)).await;

    if let Err(err) = &result {
        internal!(level = ERROR, "{err:#}");
    }
    controller::flush_logs(&logging, FLUSH_TIMEOUT).await;

    result
}

async fn run(config: Arc<Config>) -> anyhow::Result<()> {
    let server = FormServer::bind(config).await?;
    let mut signals = controller::listen_for_signals().context("Failed to install signal handlers")?;

    let shutdown = CancellationToken::new();
    let mut serve = tokio::spawn(server.serve(shutdown.clone()));

    loop {
        tokio::select! {
            received = signals.recv() => match received {
                Some(Signal::Reload) => internal!(
                    level = WARN,
                    "The form adapter does not reload its configuration; restart it to apply changes"
                ),
                Some(Signal::Shutdown) | None => break,
            },

            result = &mut serve => {
                return Ok(result.context("Form server task failed")??);
            }
        }
    }

    shutdown.cancel();

    match tokio::time::timeout(DRAIN_TIMEOUT, serve).await {
        Ok(result) => result.context("Form server task failed")??,
        Err(_) => internal!(
            level = WARN,
            "Requests still running after {DRAIN_TIMEOUT:?}, abandoning them"
        ),
    }

    Ok(())
}
