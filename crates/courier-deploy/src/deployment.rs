//! Deployment service interface and its types.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeployResult;
use crate::params::BundleType;

/// Identifier assigned to a deployment by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a new deployment ID from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// An uploaded revision bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Bucket holding the bundle.
    pub bucket: String,
    /// Object key of the bundle.
    pub key: String,
    /// Archive format.
    pub bundle_type: BundleType,
    /// Entity tag of the uploaded object.
    pub e_tag: Option<String>,
    /// Object version, if the bucket is versioned.
    pub version: Option<String>,
}

impl Revision {
    /// `s3://bucket/key` form for logs.
    #[must_use]
    pub fn url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// A request to deploy a registered revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRequest {
    /// Application name.
    pub application: String,
    /// Deployment group name.
    pub deployment_group: String,
    /// Deployment configuration name.
    pub deployment_config: Option<String>,
    /// Description shown by the service.
    pub description: Option<String>,
    /// Revision to deploy.
    pub revision: Revision,
}

/// Current status of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Accepted by the service.
    Created,
    /// Waiting for capacity.
    Queued,
    /// Instances are being updated.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully.
    Failed {
        /// Failure reported by the service.
        message: String,
    },
    /// Stopped before finishing.
    Stopped,
}

impl DeploymentStatus {
    /// Check if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Stopped)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Queued => write!(f, "queued"),
            Self::InProgress => write!(f, "in progress"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { message } => write!(f, "failed: {message}"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Remote deployment orchestration.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Register an uploaded revision with an application.
    async fn register_revision(&self, application: &str, revision: &Revision) -> DeployResult<()>;

    /// Start a deployment.
    async fn create_deployment(&self, request: &DeploymentRequest) -> DeployResult<DeploymentId>;

    /// Poll a deployment's status.
    async fn deployment_status(&self, id: &DeploymentId) -> DeployResult<DeploymentStatus>;

    /// Ask the service to stop a deployment.
    async fn stop_deployment(&self, id: &DeploymentId) -> DeployResult<()>;
}
