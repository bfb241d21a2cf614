//! Outcome of one reconcile cycle

use dboxed_types::status::ReconcileStatus;

use crate::error::ReconcileError;

/// What a reconciler reports back to the loop for one item.
///
/// - `error` set: status `Error`, retry after the error interval
/// - `requeue` set: run again shortly, writing `status` only if one is given
/// - otherwise: status `status` (default `Ok`) with `user_message`
#[derive(Debug, Default)]
pub struct ReconcileResult {
    pub status: Option<ReconcileStatus>,
    pub error: Option<ReconcileError>,
    pub user_message: String,
    pub requeue: bool,
}

impl ReconcileResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            ..Self::default()
        }
    }

    /// Success with a reconciler-defined status such as `Deleting`
    pub fn with_status(status: ReconcileStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            user_message: message.into(),
            ..Self::default()
        }
    }

    pub fn error(error: ReconcileError) -> Self {
        Self {
            user_message: error.to_string(),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Ask for another cycle without waiting for the error or resync interval
    pub fn requeue(message: impl Into<String>) -> Self {
        Self {
            requeue: true,
            user_message: message.into(),
            ..Self::default()
        }
    }

    /// Requeue and surface `status` while waiting, e.g. `Deleting`
    pub fn requeue_with_status(status: ReconcileStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            requeue: true,
            user_message: message.into(),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Status the loop persists for a non-requeued cycle
    pub fn effective_status(&self) -> ReconcileStatus {
        if self.error.is_some() {
            ReconcileStatus::Error
        } else {
            self.status.clone().unwrap_or(ReconcileStatus::Ok)
        }
    }
}

impl From<Result<ReconcileResult, ReconcileError>> for ReconcileResult {
    fn from(result: Result<ReconcileResult, ReconcileError>) -> Self {
        result.unwrap_or_else(ReconcileResult::error)
    }
}
