//! Error types for fuelbench.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.
//! Remote failures are normalized into [`BenchError::RemoteTask`] at the channel
//! boundary, so callers never branch on transport detail.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fuelbench operations.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Main error type for fuelbench.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Input rejected before any side effect (unsupported version, bad mode, ...).
    #[error("Validation error: {reason}")]
    Validation { reason: String },

    /// Any failure of a remote command or the session carrying it.
    #[error("Remote task failed on {host}: {reason}")]
    RemoteTask { host: String, reason: String },

    /// The management console did not reach the expected state.
    #[error("Fuel server error: {reason}")]
    FuelServer { reason: String },

    /// A local external process exited non-zero.
    #[error("Command '{command}' returned non-zero exit status {code}")]
    CommandFailure { command: String, code: i32 },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl BenchError {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    /// Create a remote task error for the given host.
    pub fn remote(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteTask { host: host.into(), reason: reason.into() }
    }

    /// Create a management console error.
    pub fn fuel_server(reason: impl Into<String>) -> Self {
        Self::FuelServer { reason: reason.into() }
    }

    /// Create a command failure carrying the command text and exit code.
    pub fn command(command: impl Into<String>, code: i32) -> Self {
        Self::CommandFailure { command: command.into(), code }
    }

    /// Wrap an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Short, stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::RemoteTask { .. } => "remote_task",
            Self::FuelServer { .. } => "fuel_server",
            Self::CommandFailure { .. } => "command_failure",
            Self::Io { .. } => "io",
            Self::Yaml { .. } => "yaml",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }
}
