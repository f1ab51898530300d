//! Worker agent configuration.
//!
//! Configuration is resolved once at startup from three layers, lowest
//! precedence first:
//!
//! 1. Built-in defaults (every field has one)
//! 2. The `agent.toml` file
//! 3. Command-line overrides
//!
//! The resolved [`WorkerConfig`] is immutable and shared by reference
//! (`Arc<WorkerConfig>`) with every component that needs it.

use crate::cli::CliOverrides;
use crate::observability::logging::DEFAULT_LOGGING_CONFIG_PATH;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./agent.toml";

/// Default number of media worker threads.
pub const DEFAULT_NUM_WORKERS: u32 = 24;

/// Default number of network I/O workers.
pub const DEFAULT_IO_WORKERS: u32 = 1;

/// Default recording output directory.
pub const DEFAULT_RECORDING_PATH: &str = "/tmp";

/// Default recording/streaming initialization timeout in milliseconds.
pub const DEFAULT_INITIALIZE_TIMEOUT_MS: u64 = 3000;

/// Default transport for internal media connections.
pub const DEFAULT_INTERNAL_PROTOCOL: &str = "sctp";

/// Default broker host.
pub const DEFAULT_RABBIT_HOST: &str = "localhost";

/// Default broker port.
pub const DEFAULT_RABBIT_PORT: u16 = 5672;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Parsing config error on line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
}

/// Resolved worker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub webrtc: WebrtcConfig,
    pub video: VideoConfig,
    pub avatar: toml::Table,
    pub audio: toml::Table,
    pub recording: RecordingConfig,
    pub avstream: AvStreamConfig,
    pub internal: InternalConfig,
    pub rabbit: RabbitConfig,
}

impl WorkerConfig {
    /// Logging configuration file: `webrtc.logging-config-file` from the
    /// file or `-l`, else the default.
    #[must_use]
    pub fn logging_config_path(&self) -> &Path {
        self.webrtc
            .logging_config_file
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_LOGGING_CONFIG_PATH))
    }
}

/// `[webrtc]` section. Unknown keys (including unknown CLI flags) are kept
/// in `extra`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebrtcConfig {
    pub stunserver: String,
    pub stunport: u16,
    pub minport: u16,
    pub maxport: u16,
    #[serde(rename = "keystorePath")]
    pub keystore_path: String,
    pub num_workers: u32,
    pub use_nicer: bool,
    pub io_workers: u32,
    #[serde(rename = "logging-config-file")]
    pub logging_config_file: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for WebrtcConfig {
    fn default() -> Self {
        Self {
            stunserver: String::new(),
            stunport: 0,
            minport: 0,
            maxport: 0,
            keystore_path: String::new(),
            num_workers: DEFAULT_NUM_WORKERS,
            use_nicer: false,
            io_workers: DEFAULT_IO_WORKERS,
            logging_config_file: None,
            extra: toml::Table::new(),
        }
    }
}

impl WebrtcConfig {
    /// Apply a named override. Known keys are typed; everything else lands
    /// in `extra` verbatim.
    fn set(&mut self, name: &str, value: toml::Value) {
        match (name, port_of(&value)) {
            ("stunport", Some(port)) => self.stunport = port,
            ("minport", Some(port)) => self.minport = port,
            ("maxport", Some(port)) => self.maxport = port,
            _ => match (name, value) {
                ("stunserver", toml::Value::String(s)) => self.stunserver = s,
                ("logging-config-file", toml::Value::String(s)) => {
                    self.logging_config_file = Some(PathBuf::from(s));
                }
                (name, value) => {
                    self.extra.insert(name.to_string(), value);
                }
            },
        }
    }
}

/// Built-in codec capability set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCodecs {
    pub decode: Vec<String>,
    pub encode: Vec<String>,
}

impl Default for VideoCodecs {
    fn default() -> Self {
        Self {
            decode: ["vp8", "vp9", "h264"].map(String::from).to_vec(),
            encode: ["vp8", "vp9"].map(String::from).to_vec(),
        }
    }
}

/// `[video]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    #[serde(rename = "hardwareAccelerated")]
    pub hardware_accelerated: bool,
    #[serde(rename = "enableBetterHEVCQuality")]
    pub enable_better_hevc_quality: bool,
    #[serde(rename = "MFE_timeout")]
    pub mfe_timeout: u64,
    /// Always the built-in set; a value in the file is ignored.
    #[serde(skip)]
    pub codecs: VideoCodecs,
}

/// `[recording]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub path: String,
    #[serde(rename = "initialize_timeout")]
    pub initialize_timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_RECORDING_PATH.to_string(),
            initialize_timeout_ms: DEFAULT_INITIALIZE_TIMEOUT_MS,
        }
    }
}

/// `[avstream]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AvStreamConfig {
    #[serde(rename = "initialize_timeout")]
    pub initialize_timeout_ms: u64,
}

impl Default for AvStreamConfig {
    fn default() -> Self {
        Self {
            initialize_timeout_ms: DEFAULT_INITIALIZE_TIMEOUT_MS,
        }
    }
}

/// `[internal]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InternalConfig {
    pub protocol: String,
    pub minport: u16,
    pub maxport: u16,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_INTERNAL_PROTOCOL.to_string(),
            minport: 0,
            maxport: 0,
        }
    }
}

/// `[rabbit]` section. The password is redacted in Debug output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RabbitConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
}

impl Default for RabbitConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RABBIT_HOST.to_string(),
            port: DEFAULT_RABBIT_PORT,
            username: None,
            password: None,
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn port_of(value: &toml::Value) -> Option<u16> {
    match value {
        toml::Value::Integer(i) => u16::try_from(*i).ok(),
        toml::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl WorkerConfig {
    /// Zero or empty file values count as unset.
    fn fill_unset(&mut self) {
        if self.webrtc.num_workers == 0 {
            self.webrtc.num_workers = DEFAULT_NUM_WORKERS;
        }
        if self.webrtc.io_workers == 0 {
            self.webrtc.io_workers = DEFAULT_IO_WORKERS;
        }
        if self.recording.path.is_empty() {
            self.recording.path = DEFAULT_RECORDING_PATH.to_string();
        }
        if self.recording.initialize_timeout_ms == 0 {
            self.recording.initialize_timeout_ms = DEFAULT_INITIALIZE_TIMEOUT_MS;
        }
        if self.avstream.initialize_timeout_ms == 0 {
            self.avstream.initialize_timeout_ms = DEFAULT_INITIALIZE_TIMEOUT_MS;
        }
        if self.internal.protocol.is_empty() {
            self.internal.protocol = DEFAULT_INTERNAL_PROTOCOL.to_string();
        }
    }

    /// Apply command-line overrides by flag name.
    fn apply_overrides(&mut self, overrides: &CliOverrides) {
        for (name, value) in overrides.iter() {
            match name {
                "rabbit-host" => {
                    if let toml::Value::String(host) = value {
                        self.rabbit.host.clone_from(host);
                    }
                }
                "rabbit-port" => {
                    if let Some(port) = port_of(value) {
                        self.rabbit.port = port;
                    }
                }
                _ => self.webrtc.set(name, value.clone()),
            }
        }
    }
}

/// Resolve configuration from file contents and command-line overrides.
///
/// # Errors
///
/// Returns `ConfigError::Parse` with the 1-based line and column of the
/// first syntax or type error in `contents`.
pub fn resolve(contents: &str, overrides: &CliOverrides) -> Result<WorkerConfig, ConfigError> {
    let mut config: WorkerConfig = toml::from_str(contents).map_err(|e| {
        let (line, column) = e
            .span()
            .map_or((0, 0), |span| line_and_column(contents, span.start));
        ConfigError::Parse {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    config.fill_unset();
    config.apply_overrides(overrides);
    Ok(config)
}

/// Read and resolve the configuration file at `path`.
///
/// # Errors
///
/// Returns `ConfigError::Read` if the file cannot be read, or
/// `ConfigError::Parse` if it is not valid.
pub fn load(path: &Path, overrides: &CliOverrides) -> Result<WorkerConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    debug!(target: "worker.config", path = %path.display(), "Read configuration file");
    resolve(&contents, overrides)
}

fn line_and_column(contents: &str, offset: usize) -> (usize, usize) {
    let prefix = contents.get(..offset).unwrap_or(contents);
    let line = prefix.matches('\n').count() + 1;
    let column = prefix
        .rsplit('\n')
        .next()
        .map_or(1, |last| last.chars().count() + 1);
    (line, column)
}
