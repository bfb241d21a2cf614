//! Error types for dboxed-daemon

use dboxed_store::StorageError;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store could not be opened
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A reconcile loop task panicked or was cancelled
    #[error("Reconcile loop {name} failed: {reason}")]
    Loop { name: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
