//! Deployment parameters.

use std::fmt;
use std::path::{Path, PathBuf};

use courier_transfer::StorageConfig;
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

/// Archive format of a revision bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleType {
    /// `.zip`
    Zip,
    /// `.tar`
    Tar,
    /// `.tar.gz` or `.tgz`
    Tgz,
}

impl BundleType {
    /// Detect the bundle type from a file name.
    pub fn from_path(path: &Path) -> DeployResult<Self> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else if name.ends_with(".tar") {
            Ok(Self::Tar)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::Tgz)
        } else {
            Err(DeployError::UnsupportedBundle(path.to_path_buf()))
        }
    }

    /// String representation used by deployment services.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::Tgz => "tgz",
        }
    }
}

impl fmt::Display for BundleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to upload and deploy one revision.
#[derive(Clone, Deserialize)]
pub struct DeployParams {
    /// Revision bundle, absolute or relative to `base_dir`.
    pub revision_path: PathBuf,
    /// Directory relative revision paths are resolved against.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Bucket receiving the revision.
    pub bucket: String,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Storage region.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible storage.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Access key ID; the environment is used when absent.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key; the environment is used when absent.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Application the revision belongs to.
    pub application: String,
    /// Deployment group to deploy to.
    pub deployment_group: String,
    /// Deployment configuration name; the service default when absent.
    #[serde(default)]
    pub deployment_config: Option<String>,
    /// Free-form description attached to the deployment (e.g. build number).
    #[serde(default)]
    pub description: Option<String>,
}

impl DeployParams {
    /// The revision file with `base_dir` applied.
    #[must_use]
    pub fn revision_file(&self) -> PathBuf {
        match &self.base_dir {
            Some(base) if self.revision_path.is_relative() => base.join(&self.revision_path),
            _ => self.revision_path.clone(),
        }
    }

    /// Object key of the uploaded revision: `<key_prefix>/<file name>`.
    pub fn object_key(&self) -> DeployResult<String> {
        let file_name = self
            .revision_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                DeployError::Config(format!(
                    "revision path has no usable file name: {}",
                    self.revision_path.display()
                ))
            })?;

        let prefix = self
            .key_prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .unwrap_or_default();

        if prefix.is_empty() {
            Ok(file_name.to_owned())
        } else {
            Ok(format!("{prefix}/{file_name}"))
        }
    }

    /// S3 storage configuration for the revision bucket.
    #[must_use]
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::S3 {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            allow_http: self
                .endpoint
                .as_deref()
                .is_some_and(|endpoint| endpoint.starts_with("http://")),
        }
    }
}

impl fmt::Debug for DeployParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployParams")
            .field("revision_path", &self.revision_path)
            .field("base_dir", &self.base_dir)
            .field("bucket", &self.bucket)
            .field("key_prefix", &self.key_prefix)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("application", &self.application)
            .field("deployment_group", &self.deployment_group)
            .field("deployment_config", &self.deployment_config)
            .field("description", &self.description)
            .finish()
    }
}
