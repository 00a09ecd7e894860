//! Pipeline configuration.
//!
//! [`PipelineConfig`] is the immutable, programmatic description of one
//! pipeline. [`settings`] loads the same knobs (and a few application-level
//! ones) from layered TOML files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod settings;

pub use settings::{
    AppSettings, ConfigError, ConfigHandle, LogSettings, PipelineSettings, Settings,
};

/// Default queue depth.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default retry ceiling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Default deadline for a single execution attempt.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(10);

/// What workers do with buffered jobs once shutdown begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Keep pulling until the closed queue is empty.
    #[default]
    Drain,
    /// Stop pulling as soon as cancellation fires; buffered jobs are discarded.
    Abandon,
}

/// Tuning for a [`Pipeline`](crate::pipeline::Pipeline).
///
/// Zero values mean "use the default" and are replaced by
/// [`normalized`](Self::normalized) when the pipeline opens. The exception is
/// `max_attempts`, where zero is meaningful and disables retries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use spool::config::PipelineConfig;
///
/// let config = PipelineConfig::default()
///     .with_capacity(64)
///     .with_workers(4)
///     .with_max_attempts(3)
///     .with_backoff_base(Duration::from_millis(50));
/// assert_eq!(config.capacity, 64);
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Queue depth.
    pub capacity: usize,
    /// Number of concurrent workers. `0` picks the backend's default.
    pub workers: usize,
    /// Retries allowed per job after its first attempt.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each later one.
    pub backoff_base: Duration,
    /// Deadline for one execution attempt.
    pub job_timeout: Duration,
    pub shutdown: ShutdownMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            workers: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            shutdown: ShutdownMode::Drain,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    #[must_use]
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownMode) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replaces zero capacity, workers, backoff and timeout with defaults.
    /// `default_workers` is itself clamped to at least one.
    #[must_use]
    pub fn normalized(mut self, default_workers: usize) -> Self {
        if self.capacity == 0 {
            self.capacity = DEFAULT_CAPACITY;
        }
        if self.workers == 0 {
            self.workers = default_workers.max(1);
        }
        if self.backoff_base.is_zero() {
            self.backoff_base = DEFAULT_BACKOFF_BASE;
        }
        if self.job_timeout.is_zero() {
            self.job_timeout = DEFAULT_JOB_TIMEOUT;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_fills_zero_values() {
        let config = PipelineConfig {
            capacity: 0,
            workers: 0,
            max_attempts: 0,
            backoff_base: Duration::ZERO,
            job_timeout: Duration::ZERO,
            shutdown: ShutdownMode::Abandon,
        }
        .normalized(3);

        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.workers, 3);
        assert_eq!(config.max_attempts, 0, "zero attempts is a real setting");
        assert_eq!(config.backoff_base, DEFAULT_BACKOFF_BASE);
        assert_eq!(config.job_timeout, DEFAULT_JOB_TIMEOUT);
        assert_eq!(config.shutdown, ShutdownMode::Abandon);
    }

    #[test]
    fn normalized_keeps_explicit_values() {
        let config = PipelineConfig::default()
            .with_capacity(2)
            .with_workers(8)
            .with_job_timeout(Duration::from_secs(1))
            .normalized(2);
        assert_eq!(config.capacity, 2);
        assert_eq!(config.workers, 8);
        assert_eq!(config.job_timeout, Duration::from_secs(1));
    }

    #[test]
    fn default_workers_never_zero() {
        assert_eq!(PipelineConfig::default().normalized(0).workers, 1);
    }

    #[test]
    fn shutdown_mode_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ShutdownMode,
        }
        let parsed: Wrapper = toml::from_str(r#"mode = "abandon""#).unwrap();
        assert_eq!(parsed.mode, ShutdownMode::Abandon);
    }
}
