//! Upload, register and deploy a revision.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use courier_transfer::{
    CoordinatorError, Transfer, TransferConfig, TransferCoordinator, TransferExecutor,
    TransferManager, WorkUnit,
};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::deployment::{
    DeploymentId, DeploymentRequest, DeploymentService, DeploymentStatus, Revision,
};
use crate::error::{DeployError, DeployResult};
use crate::logger::BuildLogger;
use crate::params::{BundleType, DeployParams};

/// Default interval between deployment status polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

const PROBLEM_FAILED: &str = "DEPLOYMENT_FAILURE";
const PROBLEM_TIMEOUT: &str = "DEPLOYMENT_TIMEOUT";

/// Deployment wait settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Status polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Give up waiting after this many seconds; wait forever when absent.
    pub wait_timeout_secs: Option<u64>,
    /// Wait for the deployment to finish.
    pub wait: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_timeout_secs: None,
            wait: true,
        }
    }
}

impl DeployConfig {
    /// Load the `[deploy]` section from a file and `COURIER_DEPLOY__*`
    /// environment variables.
    pub fn load_from(path: &str) -> DeployResult<Self> {
        #[derive(Default, Deserialize)]
        #[serde(default)]
        struct Root {
            deploy: DeployConfig,
        }

        let root: Root = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("COURIER_").split("__"))
            .extract()?;
        Ok(root.deploy)
    }

    /// Polling interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Wait limit, if any.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }
}

/// Result of a deployment run.
#[derive(Debug, Clone)]
pub struct DeploymentOutcome {
    /// The uploaded and registered revision.
    pub revision: Revision,
    /// The created deployment.
    pub deployment_id: DeploymentId,
    /// Final status; `None` when the run did not wait.
    pub status: Option<DeploymentStatus>,
}

/// Drives one revision from a local bundle to a finished deployment.
pub struct DeployRunner {
    service: Arc<dyn DeploymentService>,
    logger: Arc<dyn BuildLogger>,
    coordinator: TransferCoordinator,
    config: DeployConfig,
    store: Option<Arc<dyn ObjectStore>>,
}

impl DeployRunner {
    /// Create a runner with default settings.
    #[must_use]
    pub fn new(service: Arc<dyn DeploymentService>, logger: Arc<dyn BuildLogger>) -> Self {
        Self {
            service,
            logger,
            coordinator: TransferCoordinator::default(),
            config: DeployConfig::default(),
            store: None,
        }
    }

    /// Use the given wait settings.
    #[must_use]
    pub fn with_config(mut self, config: DeployConfig) -> Self {
        self.config = config;
        self
    }

    /// Use the given transfer settings for the upload.
    #[must_use]
    pub fn with_transfer_config(mut self, config: TransferConfig) -> Self {
        self.coordinator = TransferCoordinator::new(config);
        self
    }

    /// Upload through a caller-owned store instead of one built from the
    /// parameters. The store is left open after each run.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Upload the revision, register it and start a deployment, then wait
    /// for the deployment unless waiting is disabled.
    ///
    /// Cancelling `cancel` interrupts the upload, or stops the deployment if
    /// it has already started.
    pub async fn upload_register_and_deploy(
        &self,
        params: &DeployParams,
        cancel: CancellationToken,
    ) -> DeployResult<DeploymentOutcome> {
        let revision = self.upload_revision(params, &cancel).await?;

        self.ensure_running(&cancel)?;
        self.logger.message(&format!(
            "registering revision {} with application {}",
            revision.url(),
            params.application
        ));
        self.service
            .register_revision(&params.application, &revision)
            .await?;

        self.ensure_running(&cancel)?;
        let request = DeploymentRequest {
            application: params.application.clone(),
            deployment_group: params.deployment_group.clone(),
            deployment_config: params.deployment_config.clone(),
            description: params.description.clone(),
            revision: revision.clone(),
        };
        let deployment_id = self.service.create_deployment(&request).await?;
        self.logger.message(&format!(
            "started deployment {deployment_id} to group {}",
            params.deployment_group
        ));
        info!(deployment = %deployment_id, revision = %revision.url(), "deployment created");

        let status = if self.config.wait {
            Some(self.wait_for_deployment(&deployment_id, &cancel).await?)
        } else {
            None
        };

        Ok(DeploymentOutcome {
            revision,
            deployment_id,
            status,
        })
    }

    fn ensure_running(&self, cancel: &CancellationToken) -> DeployResult<()> {
        if cancel.is_cancelled() {
            self.logger.message("deployment run cancelled");
            return Err(DeployError::Cancelled);
        }
        Ok(())
    }

    async fn upload_revision(
        &self,
        params: &DeployParams,
        cancel: &CancellationToken,
    ) -> DeployResult<Revision> {
        self.ensure_running(cancel)?;

        let file = params.revision_file();
        if !file.is_file() {
            return Err(DeployError::RevisionNotFound(file));
        }
        let bundle_type = BundleType::from_path(&file)?;
        let key = params.object_key()?;

        self.logger.message(&format!(
            "uploading {} to s3://{}/{key}",
            file.display(),
            params.bucket
        ));

        let location = ObjectPath::from(key.as_str());
        let work = WorkUnit::new(move |manager: &TransferManager| {
            Ok(vec![manager.upload_file(location, file)?])
        })
        .cancel_on(cancel.clone());

        let result = match &self.store {
            Some(store) => {
                let executor = TransferExecutor::new(self.coordinator.config().pool_size())
                    .map_err(CoordinatorError::Setup)?;
                self.coordinator
                    .run(Arc::clone(store), executor, work)
                    .await
            }
            None => {
                self.coordinator
                    .run_with_storage(&params.storage_config(), work)
                    .await
            }
        };

        let completed = result.inspect_err(|e| self.logger.error(&e.to_string()))?;
        let Some(uploaded) = completed.first().and_then(Transfer::outcome) else {
            if cancel.is_cancelled() {
                self.logger.message("revision upload cancelled");
                return Err(DeployError::Cancelled);
            }
            return Err(DeployError::UploadIncomplete { key });
        };

        self.logger
            .debug(&format!("uploaded {key} ({} bytes)", uploaded.size));

        Ok(Revision {
            bucket: params.bucket.clone(),
            key,
            bundle_type,
            e_tag: uploaded.e_tag.clone(),
            version: uploaded.version.clone(),
        })
    }

    async fn wait_for_deployment(
        &self,
        id: &DeploymentId,
        cancel: &CancellationToken,
    ) -> DeployResult<DeploymentStatus> {
        let timeout = self.config.wait_timeout();
        let deadline = timeout.map(|limit| Instant::now() + limit);

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.logger.message(&format!("cancellation requested, stopping deployment {id}"));
                    if let Err(e) = self.service.stop_deployment(id).await {
                        warn!(deployment = %id, error = %e, "failed to stop deployment");
                        self.logger.error(&format!("failed to stop deployment {id}: {e}"));
                    }
                    return Err(DeployError::Cancelled);
                }
                () = expire(deadline) => {
                    let limit = timeout.unwrap_or_default();
                    let description = format!("deployment {id} did not finish within {limit:?}");
                    self.logger.problem(problem_identity(id, PROBLEM_TIMEOUT), PROBLEM_TIMEOUT, &description);
                    return Err(DeployError::Timeout { limit });
                }
                _ = ticker.tick() => {}
            }

            let status = self.service.deployment_status(id).await?;
            self.logger.debug(&format!("deployment {id} is {status}"));
            if !status.is_terminal() {
                continue;
            }

            return match status {
                DeploymentStatus::Failed { message } => {
                    let description = format!("deployment {id} failed: {message}");
                    self.logger.problem(
                        problem_identity(id, PROBLEM_FAILED),
                        PROBLEM_FAILED,
                        &description,
                    );
                    Err(DeployError::DeploymentFailed {
                        id: id.clone(),
                        message,
                    })
                }
                DeploymentStatus::Stopped => {
                    self.logger.error(&format!("deployment {id} was stopped"));
                    Err(DeployError::DeploymentStopped { id: id.clone() })
                }
                succeeded => {
                    self.logger.message(&format!("deployment {id} succeeded"));
                    Ok(succeeded)
                }
            };
        }
    }
}

impl std::fmt::Debug for DeployRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployRunner")
            .field("coordinator", &self.coordinator)
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn problem_identity(id: &DeploymentId, kind: &str) -> i32 {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    id.hash(&mut hasher);
    hasher.finish() as i32
}
