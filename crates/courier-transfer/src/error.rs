//! Error types for transfers and coordinator runs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::transfer::TransferState;

/// Errors raised by a single transfer or by the manager issuing it.
///
/// The object store error is boxed to keep `Result<T, TransferError>` small.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transfer was interrupted before reaching a terminal state.
    ///
    /// This is the cancellation signal: it is raised when the manager is shut
    /// down while the transfer is in flight.
    #[error("transfer interrupted")]
    Interrupted,

    /// The manager has been shut down and no longer accepts transfers.
    #[error("transfer manager has been shut down")]
    ManagerShutdown,

    /// Object store error (boxed - large type).
    #[error("object store error: {0}")]
    ObjectStore(Box<object_store::Error>),

    /// Failed to read a local source file.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// The file being uploaded.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A local path could not be mapped to an object location.
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    /// The task driving the transfer panicked.
    #[error("transfer task panicked: {0}")]
    Panicked(String),

    /// The outcome was already consumed by an earlier failed wait.
    #[error("no outcome available for {location} (state: {state})")]
    Unavailable {
        /// Object location of the transfer.
        location: String,
        /// State observed when the wait was attempted.
        state: TransferState,
    },

    /// The executor's worker threads could not be started.
    #[error("failed to start transfer executor: {0}")]
    Executor(#[source] io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TransferError {
    /// Whether this error is the cancellation signal rather than a failure.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<object_store::Error> for TransferError {
    fn from(err: object_store::Error) -> Self {
        Self::ObjectStore(Box::new(err))
    }
}

impl From<figment::Error> for TransferError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Errors that fail a whole coordinator run.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A transfer failed while no cancellation was in progress.
    #[error("transfer to {location} failed: {source}")]
    TransferFailed {
        /// Object location of the failed transfer.
        location: String,
        /// The original failure.
        #[source]
        source: TransferError,
    },

    /// The work unit could not issue its transfers.
    #[error("failed to issue transfers: {0}")]
    Work(#[source] TransferError),

    /// The storage client or executor for the run could not be created.
    #[error("failed to set up transfer run: {0}")]
    Setup(#[source] TransferError),
}

impl CoordinatorError {
    /// The underlying transfer error.
    #[must_use]
    pub fn cause(&self) -> &TransferError {
        match self {
            Self::TransferFailed { source, .. } => source,
            Self::Work(source) | Self::Setup(source) => source,
        }
    }
}

/// Result type alias for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Result type alias for coordinator runs.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn interrupted_is_the_only_cancellation_signal() {
        assert!(TransferError::Interrupted.is_interrupted());
        assert!(!TransferError::ManagerShutdown.is_interrupted());
        assert!(!TransferError::Panicked("boom".to_owned()).is_interrupted());
    }

    #[test]
    fn transfer_failure_preserves_cause() {
        let err = CoordinatorError::TransferFailed {
            location: "builds/42/app.zip".to_owned(),
            source: TransferError::InvalidPath("bad".to_owned()),
        };

        assert!(err.to_string().contains("builds/42/app.zip"));
        assert!(matches!(err.cause(), TransferError::InvalidPath(p) if p == "bad"));

        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("invalid object path: bad"));
    }

    #[test]
    fn object_store_errors_are_boxed() {
        let err: TransferError = object_store::Error::NotFound {
            path: "missing".to_owned(),
            source: "not here".into(),
        }
        .into();

        assert!(matches!(err, TransferError::ObjectStore(_)));
        assert!(err.to_string().starts_with("object store error"));
    }
}
