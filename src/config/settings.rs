//! Layered TOML settings.
//!
//! Several files can be given; they are merged table by table, so a later file
//! overrides only the keys it mentions:
//!
//! ```toml
//! # base.toml
//! [pipeline]
//! capacity = 500
//! workers = 4
//!
//! # production.toml
//! [pipeline]
//! workers = 8          # capacity stays 500
//! ```
//!
//! There is no process-wide instance. Build a [`ConfigHandle`], load it once at
//! startup and pass it (or the resulting [`Settings`]) to whoever needs it.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml::{Table, Value};
use tracing::info;

use super::{PipelineConfig, ShutdownMode};

/// Errors produced while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(#[from] toml::de::Error),

    #[error("settings accessed before they were loaded")]
    NotInitialized,
}

/// Everything a process built on this crate reads from its config files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub pipeline: PipelineSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    pub mode: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "spool".to_owned(),
            mode: "release".to_owned(),
        }
    }
}

/// The `[pipeline]` table. Durations are given in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub capacity: Option<usize>,
    pub workers: Option<usize>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub job_timeout_ms: Option<u64>,
    pub shutdown: Option<ShutdownMode>,
}

impl PipelineSettings {
    /// Builds a [`PipelineConfig`], falling back to defaults for absent keys.
    ///
    /// Workers left unset stay `0` so the pipeline picks the backend default.
    pub fn to_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            capacity: self.capacity.unwrap_or(defaults.capacity),
            workers: self.workers.unwrap_or(defaults.workers),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            backoff_base: self
                .backoff_base_ms
                .map_or(defaults.backoff_base, Duration::from_millis),
            job_timeout: self
                .job_timeout_ms
                .map_or(defaults.job_timeout, Duration::from_millis),
            shutdown: self.shutdown.unwrap_or(defaults.shutdown),
        }
    }
}

/// The `[log]` table, consumed by [`LogSink`](crate::sink::LogSink).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub path: PathBuf,
    pub capacity: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./logs/app.log"),
            capacity: 1000,
        }
    }
}

impl Settings {
    /// Loads and merges `paths` in order; later files win key by key.
    ///
    /// An empty list yields [`Settings::default`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] for a missing file, [`ConfigError::Parse`]
    /// for malformed TOML, [`ConfigError::Invalid`] when the merged document
    /// has the wrong shape.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut merged = Table::new();
        for path in paths {
            let path = path.as_ref();
            let layer = read_table(path)?;
            info!(path = %path.display(), "loaded config layer");
            merge_tables(&mut merged, layer);
        }
        Ok(Value::Table(merged).try_into()?)
    }

    /// Parses a single TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] on malformed or mis-shaped input.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

fn read_table(path: &Path) -> Result<Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_owned(),
            }
        } else {
            ConfigError::Read {
                path: path.to_owned(),
                source,
            }
        }
    })?;

    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

fn merge_tables(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            Value::Table(incoming) => match base.get_mut(&key) {
                Some(Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, Value::Table(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

/// An explicitly owned, load-once holder for [`Settings`].
///
/// Reading before loading is an error, not a crash.
#[derive(Debug, Default)]
pub struct ConfigHandle {
    settings: OnceLock<Settings>,
}

impl ConfigHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `paths` on first call. Later calls return the settings that were
    /// loaded first and ignore their arguments.
    ///
    /// # Errors
    ///
    /// Propagates [`Settings::load`] failures; the handle stays uninitialized
    /// so a corrected call can succeed.
    pub fn load<P: AsRef<Path>>(&self, paths: &[P]) -> Result<&Settings, ConfigError> {
        if let Some(settings) = self.settings.get() {
            return Ok(settings);
        }
        let loaded = Settings::load(paths)?;
        Ok(self.settings.get_or_init(|| loaded))
    }

    /// Returns the loaded settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotInitialized`] if [`load`](Self::load) has not
    /// succeeded yet.
    pub fn get(&self) -> Result<&Settings, ConfigError> {
        self.settings.get().ok_or(ConfigError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.settings.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn empty_document_gives_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.pipeline.to_config(), PipelineConfig::default());
    }

    #[test]
    fn pipeline_table_maps_to_config() {
        let settings = Settings::from_toml_str(
            r#"
            [pipeline]
            capacity = 10
            workers = 4
            max_attempts = 0
            backoff_base_ms = 250
            job_timeout_ms = 1500
            shutdown = "abandon"
            "#,
        )
        .unwrap();

        let config = settings.pipeline.to_config();
        assert_eq!(config.capacity, 10);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_attempts, 0);
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.job_timeout, Duration::from_millis(1500));
        assert_eq!(config.shutdown, ShutdownMode::Abandon);
    }

    #[test]
    fn later_files_override_key_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_file(
            &dir,
            "base.toml",
            "[app]\nname = \"ingest\"\n[pipeline]\ncapacity = 500\nworkers = 4\n",
        );
        let prod = write_file(&dir, "prod.toml", "[app]\nmode = \"prod\"\n[pipeline]\nworkers = 8\n");

        let settings = Settings::load(&[base, prod]).unwrap();
        assert_eq!(settings.app.name, "ingest");
        assert_eq!(settings.app.mode, "prod");
        assert_eq!(settings.pipeline.capacity, Some(500));
        assert_eq!(settings.pipeline.workers, Some(8));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Settings::load(&["/definitely/not/here.toml"]).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn malformed_file_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let bad = write_file(&dir, "bad.toml", "[pipeline\ncapacity = ");
        let err = Settings::load(&[&bad]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == &bad));
    }

    #[test]
    fn wrong_type_is_invalid() {
        let err = Settings::from_toml_str("[pipeline]\ncapacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn handle_reports_not_initialized() {
        let handle = ConfigHandle::new();
        assert!(matches!(handle.get(), Err(ConfigError::NotInitialized)));
        assert!(!handle.is_initialized());
    }

    #[test]
    fn handle_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_file(&dir, "a.toml", "[log]\ncapacity = 10\n");
        let second = write_file(&dir, "b.toml", "[log]\ncapacity = 20\n");

        let handle = ConfigHandle::new();
        assert_eq!(handle.load(&[&first]).unwrap().log.capacity, 10);
        assert_eq!(handle.load(&[&second]).unwrap().log.capacity, 10);
        assert_eq!(handle.get().unwrap().log.capacity, 10);
    }

    #[test]
    fn failed_load_leaves_handle_usable() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(&dir, "good.toml", "");

        let handle = ConfigHandle::new();
        assert!(handle.load(&["/missing.toml"]).is_err());
        assert!(handle.load(&[good]).is_ok());
        assert!(handle.is_initialized());
    }
}
