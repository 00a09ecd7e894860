//! Log-line delivery through a pipeline that would rather lose a line than wait.
//!
//! [`LogSink`] formats a message, hands it to a single-worker
//! [`Pipeline`] over a [`FileBackend`] and returns immediately. There are no
//! retries and a full queue drops the line (reported through `tracing`), so
//! logging can never stall the caller.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use tracing::{trace, warn};

use crate::backend::FileBackend;
use crate::config::{LogSettings, PipelineConfig, ShutdownMode};
use crate::pipeline::{CloseError, Pipeline, PipelineError, PipelineStats, SubmitError};

/// Severity written into each line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders one line (without the trailing newline).
pub type Formatter = fn(Level, &str, DateTime<Local>) -> String;

/// `2024-05-01 13:45:12 [INFO] message`
pub fn default_formatter(level: Level, message: &str, at: DateTime<Local>) -> String {
    format!("{} [{}] {}", at.format("%Y-%m-%d %H:%M:%S"), level, message)
}

/// Asynchronous, drop-on-full line writer.
///
/// # Examples
///
/// ```rust,no_run
/// use spool::sink::LogSink;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = LogSink::open("./logs/app.log", 1000).await?;
/// sink.info("service started");
/// sink.log(spool::sink::Level::Warn, Some("req-42"), "slow upstream");
/// sink.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct LogSink {
    pipeline: Pipeline<FileBackend>,
    formatter: Formatter,
}

impl LogSink {
    /// Opens (creating if needed) `path` for appending and starts the writer.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Init`] if the file or its directory cannot be created.
    pub async fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, PipelineError> {
        let config = PipelineConfig::default()
            .with_capacity(capacity)
            .with_workers(1)
            .with_max_attempts(0)
            .with_shutdown(ShutdownMode::Drain);

        let pipeline = Pipeline::open(config, FileBackend::new(path)).await?;
        Ok(Self {
            pipeline,
            formatter: default_formatter,
        })
    }

    /// Opens a sink described by a `[log]` settings table.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open).
    pub async fn from_settings(settings: &LogSettings) -> Result<Self, PipelineError> {
        Self::open(settings.path.clone(), settings.capacity).await
    }

    /// Replaces the line formatter.
    #[must_use]
    pub fn with_formatter(mut self, formatter: Formatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, None, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::Warn, None, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, None, message);
    }

    /// Formats and enqueues one line. `trace_id`, when present, is written as
    /// a `[traceID: ...]` prefix to the message.
    ///
    /// Never waits. Returns `false` if the line was dropped.
    pub fn log(&self, level: Level, trace_id: Option<&str>, message: impl AsRef<str>) -> bool {
        let message = message.as_ref();
        let message = match trace_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("[traceID: {id}] {message}"),
            None => message.to_owned(),
        };
        let line = (self.formatter)(level, &message, Local::now());

        match self.pipeline.try_submit(line) {
            Ok(()) => true,
            Err(SubmitError::Full) => {
                warn!(%level, line = %message, "log sink full; line dropped");
                false
            }
            Err(SubmitError::Closed) => {
                trace!(%level, "log sink closed; line discarded");
                false
            }
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.pipeline.backend().path()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Writes every queued line, then flushes and closes the file.
    ///
    /// # Errors
    ///
    /// [`CloseError`] if the final flush or sync fails.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.pipeline.close().await
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("path", &self.path())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn plain(level: Level, message: &str, _at: DateTime<Local>) -> String {
        format!("{level}|{message}")
    }

    #[test]
    fn default_format() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 12).unwrap();
        assert_eq!(
            default_formatter(Level::Warn, "disk almost full", at),
            "2024-05-01 13:45:12 [WARN] disk almost full"
        );
    }

    #[tokio::test]
    async fn writes_lines_in_order_and_drains_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.log");
        let sink = LogSink::open(&path, 100).await.unwrap().with_formatter(plain);

        sink.info("started");
        sink.log(Level::Error, Some("abc123"), "request failed");
        sink.log(Level::Warn, Some(""), "empty trace id is ignored");
        sink.close().await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            written,
            "INFO|started\n\
             ERROR|[traceID: abc123] request failed\n\
             WARN|empty trace id is ignored\n"
        );
        assert_eq!(sink.stats().succeeded, 3);
    }

    #[tokio::test]
    async fn lines_after_close_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(dir.path().join("app.log"), 10).await.unwrap();
        sink.close().await.unwrap();
        assert!(!sink.log(Level::Info, None, "too late"));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(dir.path().join("app.log"), 1).await.unwrap();

        // Far more lines than one slot can hold; none of these calls may wait.
        let accepted = (0..10_000)
            .filter(|n| sink.log(Level::Info, None, format!("line {n}")))
            .count();
        sink.close().await.unwrap();

        assert!(accepted >= 1);
        assert!(accepted < 10_000);
        assert_eq!(sink.stats().succeeded, accepted as u64);
    }

    #[tokio::test]
    async fn settings_drive_path_and_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            path: dir.path().join("from-settings.log"),
            capacity: 5,
        };
        let sink = LogSink::from_settings(&settings).await.unwrap();
        assert_eq!(sink.path(), settings.path.as_path());
        sink.close().await.unwrap();
        assert!(settings.path.exists());
    }
}
