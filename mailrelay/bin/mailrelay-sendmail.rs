use std::process::ExitCode;

use clap::Parser;
use mailrelay::sendmail::{self, Args, Mode, ParsedMessage, exit};
use mailrelay_common::{
    Config,
    config::{self, LogDestination, LoggingConfig},
    logging::Logging,
};
use tokio::io::AsyncReadExt;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return ExitCode::from(exit::OK);
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(exit::USAGE);
        }
    };

    ExitCode::from(run(args).await)
}

async fn run(args: Args) -> u8 {
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(mode) => {
            eprintln!("Unsupported mode -b{mode}");
            return exit::USAGE;
        }
    };

    let path = config::locate(args.config.as_deref());
    let config = match Config::load(&path) {
        Ok(loaded) => loaded.config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            return exit::UNAVAILABLE;
        }
    };

    // Problems go to the terminal; the relay's own log files are left alone.
    let logging = LoggingConfig {
        level: "warn".to_string(),
        destination: LogDestination::Stderr,
        ..config.logging.clone()
    };
    if let Err(err) = Logging::init(&logging) {
        eprintln!("{err}");
    }

    if mode == Mode::Maintenance {
        println!("Mail queue is empty");
        return exit::OK;
    }

    let mut input = Vec::new();
    if let Err(err) = tokio::io::stdin().read_to_end(&mut input).await {
        eprintln!("Error reading message: {err}");
        return exit::USAGE;
    }

    let message = ParsedMessage::parse(&input, args.ignore_dots);
    let request = match args.compose(&message) {
        Ok(request) => request,
        Err(err @ mailrelay::error::ComposeError::NoHeaderRecipient) => {
            eprintln!("{err}");
            return exit::NO_USER;
        }
        Err(err) => {
            eprintln!("{err}");
            return exit::USAGE;
        }
    };

    match sendmail::submit(&request, &config.server.internal_addr).await {
        Ok(()) => exit::OK,
        Err(err) => {
            eprintln!("Error sending email: {err}");
            exit::TEMP_FAIL
        }
    }
}
