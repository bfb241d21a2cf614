//! Error types for reconcilers

use dboxed_store::StorageError;
use dboxed_types::SpecParseError;
use thiserror::Error;

/// Failure of one reconcile cycle.
///
/// The `Display` form is persisted as the entity's status details, so
/// messages are written for users.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Database failure; retried
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The declared state cannot be applied as written
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// An attribute that cannot change in place was changed
    #[error("Immutable field changed: {0}")]
    Immutable(String),

    /// A referenced object does not exist
    #[error("Dependency not found: {0}")]
    DependencyNotFound(String),

    /// The spec document could not be fetched
    #[error("Source fetch failed: {0}")]
    Fetch(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconcileError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    pub fn immutable(msg: impl Into<String>) -> Self {
        Self::Immutable(msg.into())
    }

    pub fn dependency_not_found(msg: impl Into<String>) -> Self {
        Self::DependencyNotFound(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// User errors are fixed by changing the declared state, not by retrying.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSpec(_) | Self::Immutable(_) | Self::DependencyNotFound(_)
        )
    }
}

impl From<sqlx::Error> for ReconcileError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.into())
    }
}

impl From<SpecParseError> for ReconcileError {
    fn from(err: SpecParseError) -> Self {
        Self::InvalidSpec(err.to_string())
    }
}
