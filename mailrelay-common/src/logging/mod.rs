//! Process-wide logging.
//!
//! Events go through one fmt layer whose level sits behind a reload handle and
//! whose writer can be pointed at stderr or a [`LogSink`] at runtime, so a
//! configuration reload can change both without reinstalling the subscriber.

mod sink;

use std::{
    io::{self, Write},
    str::FromStr,
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, Registry,
    filter::FilterFn,
    fmt::{MakeWriter, time::ChronoUtc},
    prelude::__tracing_subscriber_SubscriberExt,
    reload,
    util::SubscriberInitExt,
};

pub use self::sink::LogSink;
use crate::{
    config::{LogDestination, LoggingConfig},
    error::LoggingError,
};

/// Environment variable that, when it names a valid level, wins over the
/// configured one.
pub const LEVEL_ENV: &str = "LOG_LEVEL";

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:tt)+) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg)+)
    }};
}

#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::outgoing!(level = TRACE, $($msg)+)
    };
}

#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::incoming!(level = TRACE, $($msg)+)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:tt)+) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg)+)
    };

    ($($msg:tt)+) => {
        $crate::internal!(level = TRACE, $($msg)+)
    };
}

#[derive(Clone)]
enum Target {
    Stderr,
    File(LogSink),
}

impl Target {
    fn flush(&self) -> io::Result<()> {
        match self {
            Self::Stderr => io::stderr().flush(),
            Self::File(sink) => sink.flush(),
        }
    }
}

/// The fmt layer's writer factory. Every event asks it for a writer, so
/// swapping the target takes effect from the next event on.
#[derive(Clone)]
struct LogWriter {
    target: Arc<RwLock<Target>>,
}

impl LogWriter {
    fn new(target: Target) -> Self {
        Self {
            target: Arc::new(RwLock::new(target)),
        }
    }

    fn replace(&self, target: Target) -> Target {
        std::mem::replace(&mut *self.target.write(), target)
    }
}

struct EventWriter(Target);

impl Write for EventWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            Target::Stderr => io::stderr().write(buf),
            Target::File(sink) => sink.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = EventWriter;

    fn make_writer(&'a self) -> Self::Writer {
        EventWriter(self.target.read().clone())
    }
}

/// A level and destination opened from configuration but not yet active.
pub struct Prepared {
    level: LevelFilter,
    target: Target,
}

impl Prepared {
    /// The level that becomes active when this is applied.
    #[must_use]
    pub const fn level(&self) -> LevelFilter {
        self.level
    }
}

/// Handle to the installed logging stack.
#[derive(Clone)]
pub struct Logging {
    level: reload::Handle<LevelFilter, Registry>,
    writer: LogWriter,
}

impl Logging {
    /// Open the configured destination and install the global subscriber.
    ///
    /// # Errors
    /// If the level is invalid, the log file cannot be opened, or a global
    /// subscriber is already installed.
    pub fn init(config: &LoggingConfig) -> Result<Self, LoggingError> {
        let (subscriber, logging) = Self::build(Self::prepare(config)?);
        subscriber.try_init()?;
        Ok(logging)
    }

    fn build(prepared: Prepared) -> (impl tracing::Subscriber + Send + Sync + 'static, Self) {
        let (level, handle) = reload::Layer::new(prepared.level);
        let writer = LogWriter::new(prepared.target);

        let subscriber = Registry::default().with(level).with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer.clone())
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(false)
                .with_timer(ChronoUtc::rfc_3339())
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("mailrelay")
                })),
        );

        (
            subscriber,
            Self {
                level: handle,
                writer,
            },
        )
    }

    /// Resolve the level and open the destination for `config` without
    /// touching the active stack.
    ///
    /// # Errors
    /// If the configured level is invalid or the log file cannot be opened.
    pub fn prepare(config: &LoggingConfig) -> Result<Prepared, LoggingError> {
        let configured = LevelFilter::from_str(&config.level)
            .map_err(|_| LoggingError::InvalidLevel(config.level.clone()))?;

        let level = std::env::var(LEVEL_ENV).map_or(configured, |level| {
            LevelFilter::from_str(level.as_str()).unwrap_or_else(|_| {
                eprintln!("Invalid log level specified {level}, defaulting to {configured}");
                configured
            })
        });

        let target = match config.destination {
            LogDestination::Stderr => Target::Stderr,
            LogDestination::File => Target::File(LogSink::open(config)?),
        };

        Ok(Prepared { level, target })
    }

    /// Make `prepared` the active level and destination. The previous
    /// destination is flushed once nothing new can reach it.
    ///
    /// # Errors
    /// If the level filter cannot be swapped; the destination is then left
    /// as it was.
    pub fn apply(&self, prepared: Prepared) -> Result<(), LoggingError> {
        self.level.reload(prepared.level)?;

        let previous = self.writer.replace(prepared.target);
        if let Err(err) = previous.flush() {
            eprintln!("Failed to flush previous log destination: {err}");
        }

        Ok(())
    }

    /// Push buffered lines to the active destination.
    ///
    /// # Errors
    /// If the underlying write fails.
    pub fn flush(&self) -> io::Result<()> {
        let target = self.writer.target.read().clone();
        target.flush()
    }
}

impl std::fmt::Debug for Logging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let destination = match &*self.writer.target.read() {
            Target::Stderr => "stderr".to_string(),
            Target::File(sink) => sink.path().display().to_string(),
        };

        f.debug_struct("Logging")
            .field("destination", &destination)
            .finish_non_exhaustive()
    }
}
