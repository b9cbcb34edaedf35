//! Transfer coordinator.
//!
//! A run hands a [`TransferManager`] to a caller-supplied [`WorkUnit`], waits
//! for every transfer the unit issued and returns the ones that completed.
//!
//! Cancellation is cooperative. A cancel-aware work unit carries a predicate
//! that a watcher task polls on the run's executor. Once the predicate
//! reports true the run is marked interrupted and the manager is shut down,
//! which interrupts everything still in flight. Failures seen after that point
//! are treated as fallout of the cancellation rather than as errors.
//!
//! The manager is shut down on every exit path, including when the run's
//! future is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use object_store::ObjectStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{StorageConfig, TransferConfig};
use crate::error::{CoordinatorError, CoordinatorResult, TransferError, TransferResult};
use crate::executor::TransferExecutor;
use crate::manager::TransferManager;
use crate::storage::create_object_store;
use crate::transfer::Transfer;

/// Predicate polled by the cancellation watcher.
pub type CancelPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Caller logic that issues transfers through a manager.
///
/// A work unit is either plain or cancel-aware. Only cancel-aware units get a
/// watcher.
pub struct WorkUnit<F> {
    issue: F,
    cancelled: Option<CancelPredicate>,
}

impl<F> WorkUnit<F>
where
    F: FnOnce(&TransferManager) -> TransferResult<Vec<Transfer>>,
{
    /// Create a plain work unit.
    pub fn new(issue: F) -> Self {
        Self {
            issue,
            cancelled: None,
        }
    }

    /// Make the unit cancel-aware: the run is cancelled once `predicate`
    /// returns true.
    #[must_use]
    pub fn cancel_when(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.cancelled = Some(Arc::new(predicate));
        self
    }

    /// Make the unit cancel-aware, cancelled by `token`.
    #[must_use]
    pub fn cancel_on(self, token: CancellationToken) -> Self {
        self.cancel_when(move || token.is_cancelled())
    }

    /// Whether the unit carries a cancellation predicate.
    #[must_use]
    pub fn is_cancel_aware(&self) -> bool {
        self.cancelled.is_some()
    }
}

impl<F> std::fmt::Debug for WorkUnit<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("cancel_aware", &self.cancelled.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs work units against a storage client with cooperative cancellation.
#[derive(Debug, Clone, Default)]
pub struct TransferCoordinator {
    config: TransferConfig,
}

impl TransferCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub const fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// The coordinator's transfer settings.
    #[must_use]
    pub const fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Run `work` against a caller-owned storage client.
    ///
    /// The executor is consumed and shut down when the run ends. The client
    /// is left to the caller.
    pub async fn run<F>(
        &self,
        store: Arc<dyn ObjectStore>,
        executor: TransferExecutor,
        work: WorkUnit<F>,
    ) -> CoordinatorResult<Vec<Transfer>>
    where
        F: FnOnce(&TransferManager) -> TransferResult<Vec<Transfer>>,
    {
        self.run_inner(store, executor, work, false).await
    }

    /// Run `work` against a storage client built from `storage`.
    ///
    /// The run owns both the client and an executor of the configured pool
    /// size, and releases both when it ends.
    pub async fn run_with_storage<F>(
        &self,
        storage: &StorageConfig,
        work: WorkUnit<F>,
    ) -> CoordinatorResult<Vec<Transfer>>
    where
        F: FnOnce(&TransferManager) -> TransferResult<Vec<Transfer>>,
    {
        let store = create_object_store(storage).map_err(CoordinatorError::Setup)?;
        let executor =
            TransferExecutor::new(self.config.pool_size()).map_err(CoordinatorError::Setup)?;
        self.run_inner(store, executor, work, true).await
    }

    async fn run_inner<F>(
        &self,
        store: Arc<dyn ObjectStore>,
        executor: TransferExecutor,
        work: WorkUnit<F>,
        shutdown_client: bool,
    ) -> CoordinatorResult<Vec<Transfer>>
    where
        F: FnOnce(&TransferManager) -> TransferResult<Vec<Transfer>>,
    {
        let WorkUnit { issue, cancelled } = work;
        let interrupted = Arc::new(AtomicBool::new(false));
        let published: Arc<OnceLock<TransferManager>> = Arc::new(OnceLock::new());

        info!(
            pool_size = executor.pool_size(),
            cancel_aware = cancelled.is_some(),
            "starting transfer run"
        );

        // The watcher goes onto the pool before any transfer can occupy it.
        if let Some(predicate) = cancelled {
            executor.spawn(watch(
                predicate,
                Arc::clone(&interrupted),
                Arc::clone(&published),
                self.config.watch_interval(),
                shutdown_client,
            ));
        }

        let manager = TransferManager::with_config(store, executor, &self.config);
        let _release = ShutdownGuard {
            manager: manager.clone(),
            shutdown_client,
        };
        let _ = published.set(manager.clone());

        if interrupted.load(Ordering::SeqCst) {
            info!("transfer run cancelled before any work was issued");
            return Ok(Vec::new());
        }

        let transfers = match issue(&manager) {
            Ok(transfers) => transfers,
            Err(e) if interrupted.load(Ordering::SeqCst) => {
                debug!(error = %e, "ignoring work unit error after cancellation");
                return Ok(Vec::new());
            }
            Err(e) => return Err(CoordinatorError::Work(e)),
        };

        let issued = transfers.len();
        let mut completed = Vec::with_capacity(issued);

        for mut transfer in transfers {
            let outcome = transfer.wait_for_completion().await.map(|_| ());
            match outcome {
                Ok(()) => completed.push(transfer),
                Err(TransferError::Interrupted) => {
                    if !interrupted.load(Ordering::SeqCst) {
                        warn!(
                            location = %transfer.location(),
                            "transfer interrupted without a cancellation request"
                        );
                    }
                }
                Err(e) if interrupted.load(Ordering::SeqCst) => {
                    debug!(
                        location = %transfer.location(),
                        error = %e,
                        "ignoring transfer failure after cancellation"
                    );
                }
                Err(source) => {
                    return Err(CoordinatorError::TransferFailed {
                        location: transfer.location().to_string(),
                        source,
                    });
                }
            }
        }

        info!(
            issued,
            completed = completed.len(),
            cancelled = interrupted.load(Ordering::SeqCst),
            "transfer run finished"
        );
        Ok(completed)
    }
}

/// Poll `predicate` until it fires, then interrupt the run.
///
/// The manager is shut down before the flag is raised, so every transfer the
/// run still reports as completed finished ahead of the interruption. If the
/// manager has not been published yet the flag alone is enough: the run checks
/// it right after publishing. The watcher keeps looking for the manager so a
/// lost race still ends in a shutdown.
async fn watch(
    predicate: CancelPredicate,
    interrupted: Arc<AtomicBool>,
    published: Arc<OnceLock<TransferManager>>,
    interval: Duration,
    shutdown_client: bool,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut requested = false;

    loop {
        ticker.tick().await;

        if !requested && predicate() {
            requested = true;
            info!("cancellation requested, interrupting transfers");
        }

        if requested {
            if let Some(manager) = published.get() {
                manager.shutdown_now(shutdown_client);
                interrupted.store(true, Ordering::SeqCst);
                return;
            }
            interrupted.store(true, Ordering::SeqCst);
        }
    }
}

/// Shuts the manager down when the run ends, however it ends.
struct ShutdownGuard {
    manager: TransferManager,
    shutdown_client: bool,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.manager.shutdown_now(self.shutdown_client);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use bytes::Bytes;
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;

    use super::*;
    use crate::transfer::TransferState;

    #[test]
    fn plain_and_cancel_aware_units() {
        let plain = WorkUnit::new(|_: &TransferManager| Ok(Vec::new()));
        assert!(!plain.is_cancel_aware());

        let aware = WorkUnit::new(|_: &TransferManager| Ok(Vec::new())).cancel_when(|| false);
        assert!(aware.is_cancel_aware());
    }

    #[test]
    fn cancel_on_follows_the_token() {
        let token = CancellationToken::new();
        let unit = WorkUnit::new(|_: &TransferManager| Ok(Vec::new())).cancel_on(token.clone());
        let predicate = unit.cancelled.clone().unwrap();

        assert!(!predicate());
        token.cancel();
        assert!(predicate());
    }

    #[tokio::test]
    async fn watcher_shuts_down_published_manager() {
        let executor = TransferExecutor::new(1).unwrap();
        let manager = TransferManager::new(Arc::new(InMemory::new()), executor);
        let interrupted = Arc::new(AtomicBool::new(false));
        let published = Arc::new(OnceLock::new());
        published.set(manager.clone()).unwrap();

        watch(
            Arc::new(|| true),
            Arc::clone(&interrupted),
            published,
            Duration::from_millis(5),
            true,
        )
        .await;

        assert!(interrupted.load(Ordering::SeqCst));
        assert!(manager.is_shutdown());
        assert!(!manager.has_client());
    }

    #[tokio::test]
    async fn watcher_seals_transfers_before_raising_the_flag() {
        let executor = TransferExecutor::new(1).unwrap();
        let (release, gate) = std::sync::mpsc::channel::<()>();
        // Hold the only worker so the upload below stays queued.
        executor.spawn(async move {
            let _ = gate.recv();
        });

        let manager = TransferManager::new(Arc::new(InMemory::new()), executor);
        let queued = manager
            .upload_bytes(ObjectPath::from("queued.txt"), Bytes::from_static(b"late"))
            .unwrap();

        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&interrupted);
        let observer = std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
            queued.state()
        });

        let published = Arc::new(OnceLock::new());
        published.set(manager.clone()).unwrap();
        watch(
            Arc::new(|| true),
            interrupted,
            published,
            Duration::from_millis(5),
            false,
        )
        .await;

        assert_eq!(observer.join().unwrap(), TransferState::Canceled);
        let _ = release.send(());
    }

    #[tokio::test]
    async fn guard_releases_manager_on_drop() {
        let manager = TransferManager::new(
            Arc::new(InMemory::new()),
            TransferExecutor::new(1).unwrap(),
        );

        drop(ShutdownGuard {
            manager: manager.clone(),
            shutdown_client: false,
        });

        assert!(manager.is_shutdown());
        assert!(manager.has_client());
    }
}
