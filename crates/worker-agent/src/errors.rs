//! Worker agent error types.
//!
//! Every failure surfaced at the supervision layer is terminal for the
//! setup chain. `WorkerError` maps each concern to the process exit status
//! and to the message reported to the parent process.

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::controllers::DispatchError;
use crate::identity::LaunchError;
use crate::observability::logging::LoggingError;
use crate::upstream::UpstreamMessage;
use thiserror::Error;

/// Worker agent error type.
///
/// Exit status mapping:
/// - `Config`, `Launch`, `Broker`, `Dispatch`: 1
/// - `Logging`: never fatal, reported as 1 if it ever reaches `main`
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Positional launch arguments were malformed.
    #[error("Launch argument error: {0}")]
    Launch(#[from] LaunchError),

    /// Broker connect or role acquisition failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// No controller variant matches the declared purpose.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Logging configuration could not be applied.
    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

impl WorkerError {
    /// Returns the process exit status for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            WorkerError::Config(_)
            | WorkerError::Launch(_)
            | WorkerError::Broker(_)
            | WorkerError::Dispatch(_)
            | WorkerError::Logging(_) => 1,
        }
    }

    /// Returns the message reported to the parent process, if any.
    ///
    /// Configuration errors happen before the upstream channel matters to the
    /// parent, so they are only logged.
    #[must_use]
    pub const fn upstream_message(&self) -> Option<UpstreamMessage> {
        match self {
            WorkerError::Launch(_) | WorkerError::Broker(_) => Some(UpstreamMessage::Error),
            WorkerError::Dispatch(DispatchError::AmbiguousPurpose(_)) => {
                Some(UpstreamMessage::AmbiguousPurpose)
            }
            WorkerError::Config(_) | WorkerError::Logging(_) => None,
        }
    }
}
