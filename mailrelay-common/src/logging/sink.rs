//! Buffered, size-capped log file.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

use crate::{config::LoggingConfig, error::LoggingError};

const MEGABYTE: u64 = 1024 * 1024;

/// Append-only log file shared by every event writer.
///
/// Once a write would take the active file past `max_size_mb` it is renamed
/// to `<name>.<unix millis>.log` and a fresh file is opened. Rotated files are
/// then pruned, oldest first, until they fit in `max_total_size_mb` alongside
/// a full-sized active file.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<SinkState>>,
}

struct SinkState {
    directory: PathBuf,
    name: String,
    path: PathBuf,
    buffer_size: usize,
    writer: BufWriter<File>,
    written: u64,
    max_size: u64,
    max_total: u64,
}

impl LogSink {
    /// Create the log directory if needed and open the active file for append.
    ///
    /// # Errors
    /// If the directory or file cannot be created or opened.
    pub fn open(config: &LoggingConfig) -> Result<Self, LoggingError> {
        let path = config.file_path();
        std::fs::create_dir_all(&config.directory).map_err(|source| LoggingError::Open {
            path: config.directory.clone(),
            source,
        })?;

        let (file, written) = open_append(&path).map_err(|source| LoggingError::Open {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            inner: Arc::new(Mutex::new(SinkState {
                directory: config.directory.clone(),
                name: config.name.clone(),
                path,
                buffer_size: config.buffer_size,
                writer: BufWriter::with_capacity(config.buffer_size, file),
                written,
                max_size: config.max_size_mb.saturating_mul(MEGABYTE),
                max_total: config.max_total_size_mb.saturating_mul(MEGABYTE),
            })),
        })
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }

    /// Push buffered lines to the file.
    ///
    /// # Errors
    /// If the underlying write fails.
    pub fn flush(&self) -> io::Result<()> {
        self.inner.lock().writer.flush()
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock();

        if state.written > 0 && state.written + buf.len() as u64 > state.max_size {
            state.rotate()?;
        }

        let written = state.writer.write(buf)?;
        state.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        LogSink::flush(self)
    }
}

impl SinkState {
    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis());
        let mut rotated = self.directory.join(format!("{}.{millis}.log", self.name));
        let mut suffix = 0;
        while rotated.exists() {
            suffix += 1;
            rotated = self
                .directory
                .join(format!("{}.{millis}-{suffix}.log", self.name));
        }
        std::fs::rename(&self.path, &rotated)?;

        let (file, written) = open_append(&self.path)?;
        self.writer = BufWriter::with_capacity(self.buffer_size, file);
        self.written = written;

        self.prune()
    }

    fn prune(&self) -> io::Result<()> {
        let prefix = format!("{}.", self.name);
        let mut rotated = Vec::new();

        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if path == self.path {
                continue;
            }

            let is_rotated = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
                n.starts_with(&prefix) && n.ends_with(".log") && n.len() > prefix.len() + 4
            });
            if is_rotated {
                rotated.push((path, entry.metadata()?.len()));
            }
        }

        // Millisecond stamps share a width, so name order is age order.
        rotated.sort_by(|(a, _), (b, _)| a.cmp(b));

        // Room is kept for the active file to grow to its own cap.
        let mut total = self.max_size.max(self.written) + rotated.iter().map(|(_, len)| len).sum::<u64>();
        for (path, len) in rotated {
            if total <= self.max_total {
                break;
            }
            std::fs::remove_file(&path)?;
            total -= len;
        }

        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}
