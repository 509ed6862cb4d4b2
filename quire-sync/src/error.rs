//! Error types for quire-sync.

use thiserror::Error;

use quire_core::{ContentError, RemoteError, StoreError};

/// All errors that can arise from status, publish, and save operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error reported by the remote repository.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An error from the record store.
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    /// An error reading local content.
    #[error("content error: {0}")]
    Content(#[from] ContentError),

    /// Another batch is already running on this orchestrator.
    #[error("{operation} already in progress")]
    Busy { operation: &'static str },

    /// Another orchestrator holds the lock for this item.
    #[error("{path} is being written by another publisher")]
    ItemLocked { path: String },

    #[error("validation error: {0}")]
    Validation(String),

    /// Cancelled by the caller before the work started.
    #[error("operation aborted")]
    Aborted,
}

impl SyncError {
    /// The remote failure behind this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::Conflict { .. }))
    }
}
