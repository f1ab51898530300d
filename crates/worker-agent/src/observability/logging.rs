//! Logging setup and runtime reconfiguration.
//!
//! Logs go to stderr; stdout carries the parent line protocol. The filter
//! sits behind a `reload` layer so the reconfiguration signal can re-read
//! the logging configuration file and swap it without restarting.
//!
//! Logging configuration file (TOML, every key optional):
//!
//! ```toml
//! filter = "worker_agent=debug"
//! format = "json"   # or "text"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Logging configuration used when `-l` is not given.
pub const DEFAULT_LOGGING_CONFIG_PATH: &str = "./logging.toml";

/// Filter used when the file does not set one.
pub const DEFAULT_FILTER: &str = "worker_agent=info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to read logging config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid logging config {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("Failed to install log subscriber: {0}")]
    Install(String),

    #[error("Failed to reload log filter: {0}")]
    Reload(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Contents of the logging configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingSettings {
    /// Read settings from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `LoggingError::Read` if the file exists but cannot be read,
    /// and `LoggingError::Parse` if it is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, LoggingError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(LoggingError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        toml::from_str(&contents).map_err(|e| LoggingError::Parse {
            path: path.display().to_string(),
            reason: e.message().to_string(),
        })
    }

    fn env_filter(&self) -> Result<EnvFilter, LoggingError> {
        EnvFilter::try_new(&self.filter).map_err(|e| LoggingError::Filter {
            filter: self.filter.clone(),
            reason: e.to_string(),
        })
    }
}

/// Re-applies the logging configuration at runtime.
pub trait LogReconfigure: Send + Sync {
    /// Re-read the logging configuration and apply it.
    ///
    /// # Errors
    ///
    /// Returns a `LoggingError` if the file is invalid or the subscriber is
    /// gone. The previous filter stays in effect.
    fn reconfigure(&self) -> Result<(), LoggingError>;
}

/// Swaps the installed filter for the one in the logging configuration
/// file. The output format is fixed at startup.
pub struct LogReloader {
    path: PathBuf,
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogReloader {
    #[must_use]
    pub fn new(path: PathBuf, handle: reload::Handle<EnvFilter, Registry>) -> Self {
        Self { path, handle }
    }
}

impl LogReconfigure for LogReloader {
    fn reconfigure(&self) -> Result<(), LoggingError> {
        let settings = LoggingSettings::load(&self.path)?;
        let filter = settings.env_filter()?;
        self.handle
            .reload(filter)
            .map_err(|e| LoggingError::Reload(e.to_string()))?;

        info!(
            target: "worker.logging",
            path = %self.path.display(),
            filter = %settings.filter,
            "Logging reconfigured"
        );
        Ok(())
    }
}

/// Install the global subscriber from the logging configuration at `path`.
///
/// `RUST_LOG`, when set, takes precedence over the file's filter at
/// startup. Reconfiguration always applies the file's filter.
///
/// # Errors
///
/// Returns a `LoggingError` if the file is invalid or a global subscriber
/// is already installed.
pub fn init(path: &Path) -> Result<LogReloader, LoggingError> {
    let settings = LoggingSettings::load(path)?;
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => settings.env_filter()?,
    };

    let (filter_layer, handle) = reload::Layer::new(filter);
    let registry = tracing_subscriber::registry().with(filter_layer);
    let installed = match settings.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))?;

    Ok(LogReloader::new(path.to_path_buf(), handle))
}
