//! Error types for deployment runs.

use std::path::PathBuf;
use std::time::Duration;

use courier_transfer::CoordinatorError;
use thiserror::Error;

use crate::deployment::DeploymentId;

/// Errors that can occur while deploying a revision.
#[derive(Debug, Error)]
pub enum DeployError {
    // ─────────────────────────────────────────────────────────────────────────
    // Revision errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The revision file does not exist.
    #[error("revision not found: {}", .0.display())]
    RevisionNotFound(PathBuf),

    /// The revision is not a zip, tar or tar.gz archive.
    #[error("unsupported revision bundle: {}", .0.display())]
    UnsupportedBundle(PathBuf),

    // ─────────────────────────────────────────────────────────────────────────
    // Upload errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The upload run failed.
    #[error("failed to upload revision: {0}")]
    Upload(#[from] CoordinatorError),

    /// The upload run ended without the revision being stored.
    #[error("revision upload to {key} did not complete")]
    UploadIncomplete {
        /// Object key of the revision.
        key: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Deployment errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The deployment service rejected a request.
    #[error("deployment service error: {0}")]
    Service(String),

    /// The deployment finished unsuccessfully.
    #[error("deployment {id} failed: {message}")]
    DeploymentFailed {
        /// Deployment identifier.
        id: DeploymentId,
        /// Failure reported by the service.
        message: String,
    },

    /// The deployment was stopped outside of this run.
    #[error("deployment {id} was stopped")]
    DeploymentStopped {
        /// Deployment identifier.
        id: DeploymentId,
    },

    /// The deployment did not finish in time.
    #[error("deployment did not finish within {limit:?}")]
    Timeout {
        /// The configured wait limit.
        limit: Duration,
    },

    /// The run was cancelled.
    #[error("deployment run cancelled")]
    Cancelled,

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid parameters or configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<figment::Error> for DeployError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;
