//! Revision deployment on top of `courier-transfer`.
//!
//! A deployment run uploads a revision bundle through the transfer
//! coordinator, registers it with a [`DeploymentService`], starts a deployment
//! and optionally waits for it to finish. Progress is reported to a
//! [`BuildLogger`]. One cancellation token covers the whole run.

pub mod deployment;
pub mod error;
pub mod logger;
pub mod params;
pub mod runner;

pub use deployment::{
    DeploymentId, DeploymentRequest, DeploymentService, DeploymentStatus, Revision,
};
pub use error::{DeployError, DeployResult};
pub use logger::{BuildLogger, TracingBuildLogger};
pub use params::{BundleType, DeployParams};
pub use runner::{DeployConfig, DeployRunner, DeploymentOutcome};
