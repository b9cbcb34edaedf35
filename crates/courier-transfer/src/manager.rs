//! Transfer manager: issues uploads onto a [`TransferExecutor`].
//!
//! The manager owns its executor and shares the storage client. Shutting it
//! down cancels everything in flight and optionally releases the client.
//! Interrupted transfers keep running on the executor just long enough to
//! abort their multipart uploads; the executor stops once they are done or the
//! configured grace period runs out. Shutdown is idempotent and may race
//! freely between a cancellation watcher and the coordinator's own exit path.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutResult, WriteMultipart};
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::executor::TransferExecutor;
use crate::transfer::{Transfer, TransferState, TransferStatus, Uploaded};

/// Multipart tuning captured from [`TransferConfig`].
#[derive(Debug, Clone, Copy)]
struct MultipartSettings {
    threshold: u64,
    part_size: usize,
    part_concurrency: usize,
}

impl From<&TransferConfig> for MultipartSettings {
    fn from(config: &TransferConfig) -> Self {
        Self {
            threshold: config.multipart_threshold,
            part_size: config.part_size.max(1),
            part_concurrency: config.part_concurrency.max(1),
        }
    }
}

struct ManagerInner {
    store: RwLock<Option<Arc<dyn ObjectStore>>>,
    executor: TransferExecutor,
    cancel: CancellationToken,
    shut_down: AtomicBool,
    transfers: Mutex<Vec<Arc<TransferStatus>>>,
    tasks: TaskTracker,
    grace: Duration,
    multipart: MultipartSettings,
}

/// Issues transfers against one storage client on one executor.
///
/// Cloning is cheap; all clones share the same resources.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<ManagerInner>,
}

impl TransferManager {
    /// Create a manager with default transfer settings.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, executor: TransferExecutor) -> Self {
        Self::with_config(store, executor, &TransferConfig::default())
    }

    /// Create a manager using the multipart settings from `config`.
    ///
    /// The manager takes ownership of the executor and shuts it down along
    /// with itself.
    #[must_use]
    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        executor: TransferExecutor,
        config: &TransferConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store: RwLock::new(Some(store)),
                executor,
                cancel: CancellationToken::new(),
                shut_down: AtomicBool::new(false),
                transfers: Mutex::new(Vec::new()),
                tasks: TaskTracker::new(),
                grace: config.shutdown_grace(),
                multipart: MultipartSettings::from(config),
            }),
        }
    }

    /// The storage client, unless it has been released.
    pub fn client(&self) -> TransferResult<Arc<dyn ObjectStore>> {
        if self.is_shutdown() {
            return Err(TransferError::ManagerShutdown);
        }
        self.inner
            .store
            .read()
            .clone()
            .ok_or(TransferError::ManagerShutdown)
    }

    /// Whether the manager still holds its storage client.
    #[must_use]
    pub fn has_client(&self) -> bool {
        self.inner.store.read().is_some()
    }

    /// The executor running this manager's transfers.
    #[must_use]
    pub fn executor(&self) -> &TransferExecutor {
        &self.inner.executor
    }

    /// Whether [`shutdown_now`](Self::shutdown_now) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Upload an in-memory buffer.
    pub fn upload_bytes(&self, location: ObjectPath, data: Bytes) -> TransferResult<Transfer> {
        let target = location.clone();
        self.issue(location, move |store, status, cancel| async move {
            let size = data.len() as u64;
            status.set_total(size);

            let put = interruptible(&cancel, store.put(&target, data.into())).await?;
            status.add_transferred(size);

            Ok(Uploaded::new(target, size, put))
        })
    }

    /// Upload a local file.
    ///
    /// Files larger than the multipart threshold are streamed in parts; a
    /// cancelled multipart upload is aborted.
    pub fn upload_file(
        &self,
        location: ObjectPath,
        path: impl Into<PathBuf>,
    ) -> TransferResult<Transfer> {
        let path = path.into();
        let target = location.clone();
        let multipart = self.inner.multipart;

        self.issue(location, move |store, status, cancel| async move {
            let size = tokio::fs::metadata(&path)
                .await
                .map_err(|e| read_error(&path, e))?
                .len();
            status.set_total(size);

            let put = if size > multipart.threshold {
                debug!(location = %target, size, "using multipart upload");
                put_multipart(store.as_ref(), &target, &path, multipart, &status, &cancel).await?
            } else {
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| read_error(&path, e))?;
                let put = interruptible(&cancel, store.put(&target, Bytes::from(data).into()))
                    .await?;
                status.add_transferred(size);
                put
            };

            Ok(Uploaded::new(target, size, put))
        })
    }

    /// Upload every regular file below `dir`.
    ///
    /// Objects are named `prefix/<path relative to dir>`. Transfers are issued
    /// in sorted path order. Symbolic links are not followed.
    pub fn upload_directory(
        &self,
        prefix: &ObjectPath,
        dir: &Path,
    ) -> TransferResult<Vec<Transfer>> {
        let files = collect_files(dir)?;
        debug!(dir = %dir.display(), files = files.len(), "uploading directory");

        files
            .into_iter()
            .map(|file| {
                let location = object_location(prefix, dir, &file)?;
                self.upload_file(location, file)
            })
            .collect()
    }

    /// Cancel in-flight transfers and stop the executor.
    ///
    /// Transfers that have not finished are marked canceled, so none of them
    /// can complete afterwards. Their tasks still get up to the configured
    /// grace period to abort what they started; the executor stops as soon as
    /// the last one returns. With `shutdown_client` the manager also drops
    /// its storage client. Repeated calls are harmless; returns `true` only
    /// for the call that performed the shutdown.
    pub fn shutdown_now(&self, shutdown_client: bool) -> bool {
        let first = !self.inner.shut_down.swap(true, Ordering::SeqCst);

        if first {
            self.inner.cancel.cancel();
            let interrupted = self.seal();
            self.inner.tasks.close();
            if self.inner.tasks.is_empty() {
                self.inner.executor.shutdown();
            } else {
                self.stop_after_cleanup();
            }
            info!(interrupted, "transfer manager shut down");
        }

        if shutdown_client && self.inner.store.write().take().is_some() {
            debug!("storage client released");
        }

        first
    }

    /// Mark every unfinished transfer canceled. Returns how many were.
    fn seal(&self) -> usize {
        self.inner
            .transfers
            .lock()
            .iter()
            .filter(|status| status.finish(TransferState::Canceled))
            .count()
    }

    fn stop_after_cleanup(&self) {
        let inner = Arc::clone(&self.inner);
        self.inner.executor.spawn(async move {
            if tokio::time::timeout(inner.grace, inner.tasks.wait()).await.is_err() {
                warn!(
                    pending = inner.tasks.len(),
                    grace = ?inner.grace,
                    "interrupted transfers did not finish cleaning up"
                );
            }
            inner.executor.shutdown();
        });
    }

    fn issue<F, Fut>(&self, location: ObjectPath, job: F) -> TransferResult<Transfer>
    where
        F: FnOnce(Arc<dyn ObjectStore>, Arc<TransferStatus>, CancellationToken) -> Fut,
        Fut: Future<Output = TransferResult<Uploaded>> + Send + 'static,
    {
        let store = self.client()?;
        let status = TransferStatus::new();
        self.inner.transfers.lock().push(Arc::clone(&status));

        let job = job(store, Arc::clone(&status), self.inner.cancel.clone());
        let task_status = Arc::clone(&status);
        let task = self.inner.executor.spawn(self.inner.tasks.track_future(async move {
            if !task_status.start() {
                return Err(TransferError::Interrupted);
            }

            let result = job.await;
            let reached = match &result {
                Ok(_) => TransferState::Completed,
                Err(e) if e.is_interrupted() => TransferState::Canceled,
                Err(_) => TransferState::Failed,
            };

            if task_status.finish(reached) {
                result
            } else {
                // Canceled by a shutdown while the job was still running.
                Err(TransferError::Interrupted)
            }
        }));

        debug!(location = %location, "transfer issued");
        Ok(Transfer::new(location, status, task))
    }
}

impl std::fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferManager")
            .field("executor", &self.inner.executor)
            .field("has_client", &self.has_client())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// Race a store operation against cancellation.
async fn interruptible<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = object_store::Result<T>>,
) -> TransferResult<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransferError::Interrupted),
        result = operation => result.map_err(TransferError::from),
    }
}

async fn put_multipart(
    store: &dyn ObjectStore,
    location: &ObjectPath,
    path: &Path,
    settings: MultipartSettings,
    status: &TransferStatus,
    cancel: &CancellationToken,
) -> TransferResult<PutResult> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| read_error(path, e))?;
    let upload = interruptible(cancel, store.put_multipart(location)).await?;
    let mut writer = WriteMultipart::new_with_chunk_size(upload, settings.part_size);
    let mut buf = vec![0_u8; settings.part_size];

    loop {
        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            read = next_part(&mut writer, &mut file, &mut buf, path, settings.part_concurrency) => Some(read),
        };

        match step {
            None => {
                abort_upload(writer, location).await;
                return Err(TransferError::Interrupted);
            }
            Some(Err(e)) => {
                abort_upload(writer, location).await;
                return Err(e);
            }
            Some(Ok(0)) => break,
            Some(Ok(n)) => status.add_transferred(n as u64),
        }
    }

    // Everything has been handed to the writer. Wait for the parts under
    // cancellation so an interrupted or failed upload is still aborted.
    let flushed = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(TransferError::Interrupted),
        flushed = writer.wait_for_capacity(0) => flushed.map_err(TransferError::from),
    };
    if let Err(e) = flushed {
        abort_upload(writer, location).await;
        return Err(e);
    }

    // Only the trailing part and the completion request are left.
    writer.finish().await.map_err(TransferError::from)
}

/// Wait for a free part slot, then hand the next chunk of the file to the
/// writer. Returns the number of bytes read; 0 at end of file.
async fn next_part(
    writer: &mut WriteMultipart,
    file: &mut tokio::fs::File,
    buf: &mut [u8],
    path: &Path,
    max_concurrency: usize,
) -> TransferResult<usize> {
    writer.wait_for_capacity(max_concurrency).await?;
    let n = file.read(buf).await.map_err(|e| read_error(path, e))?;
    if n > 0 {
        writer.write(&buf[..n]);
    }
    Ok(n)
}

async fn abort_upload(writer: WriteMultipart, location: &ObjectPath) {
    if let Err(e) = writer.abort().await {
        warn!(location = %location, error = %e, "failed to abort multipart upload");
    }
}

fn read_error(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::Read {
        path: path.to_path_buf(),
        source,
    }
}

/// Regular files below `root`, sorted.
fn collect_files(root: &Path) -> TransferResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| read_error(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| read_error(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| read_error(&entry.path(), e))?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

fn object_location(prefix: &ObjectPath, root: &Path, file: &Path) -> TransferResult<ObjectPath> {
    let relative = file
        .strip_prefix(root)
        .map_err(|_| TransferError::InvalidPath(file.display().to_string()))?;

    let mut location = prefix.clone();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(TransferError::InvalidPath(file.display().to_string()));
        };
        let part = part
            .to_str()
            .ok_or_else(|| TransferError::InvalidPath(format!("non UTF-8 path: {}", file.display())))?;
        location = location.child(part);
    }
    Ok(location)
}
