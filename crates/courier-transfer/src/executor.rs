//! Dedicated worker pool for transfers.
//!
//! Each executor owns a multi-threaded tokio runtime with a fixed number of
//! worker threads, named `transfer-worker-<n>` and numbered from 1. Blocking
//! offload (file reads, local storage writes) runs on a separate set of at
//! most `pool_size` threads named `transfer-blocking-<n>`, so an executor
//! never holds more than twice its pool size in threads.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DEFAULT_POOL_SIZE;
use crate::error::{TransferError, TransferResult};

/// Prefix of every worker thread name produced by a [`TransferExecutor`].
pub const WORKER_NAME_PREFIX: &str = "transfer-worker";

/// Prefix of the blocking-offload thread names.
pub const BLOCKING_NAME_PREFIX: &str = "transfer-blocking";

/// Bookkeeping shared with the runtime's thread hooks.
#[derive(Debug)]
struct ThreadRegistry {
    pool_size: usize,
    next_id: AtomicUsize,
    live: AtomicUsize,
    workers: Mutex<Vec<String>>,
    blocking: Mutex<Vec<String>>,
}

impl ThreadRegistry {
    fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            next_id: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
            blocking: Mutex::new(Vec::new()),
        }
    }

    /// The runtime starts all of its workers inside `build`, before anything
    /// can be offloaded, so the first `pool_size` names go to workers.
    fn next_name(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        if id <= self.pool_size {
            format!("{WORKER_NAME_PREFIX}-{id}")
        } else {
            format!("{BLOCKING_NAME_PREFIX}-{}", id - self.pool_size)
        }
    }

    fn started(&self, name: &str) {
        self.live.fetch_add(1, Ordering::SeqCst);
        if name.starts_with(WORKER_NAME_PREFIX) {
            self.workers.lock().push(name.to_owned());
        } else {
            self.blocking.lock().push(name.to_owned());
        }
    }
}

/// Fixed-size thread pool running transfer tasks and cancellation watchers.
pub struct TransferExecutor {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    pool_size: usize,
    threads: Arc<ThreadRegistry>,
}

impl TransferExecutor {
    /// Create an executor with `pool_size` worker threads.
    ///
    /// A pool size of zero is raised to one. The threads are started
    /// immediately and stay idle until work is spawned.
    pub fn new(pool_size: usize) -> TransferResult<Self> {
        if pool_size == 0 {
            warn!("transfer pool size 0 is invalid, using 1");
        }
        let pool_size = pool_size.max(1);
        let threads = Arc::new(ThreadRegistry::new(pool_size));

        let naming = Arc::clone(&threads);
        let on_start = Arc::clone(&threads);
        let on_stop = Arc::clone(&threads);

        let runtime = Builder::new_multi_thread()
            .worker_threads(pool_size)
            .max_blocking_threads(pool_size)
            .thread_name_fn(move || naming.next_name())
            .on_thread_start(move || {
                if let Some(name) = std::thread::current().name() {
                    on_start.started(name);
                }
            })
            .on_thread_stop(move || {
                on_stop.live.fetch_sub(1, Ordering::SeqCst);
            })
            .enable_all()
            .build()
            .map_err(TransferError::Executor)?;

        debug!(pool_size, "transfer executor started");

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            pool_size,
            threads,
        })
    }

    /// Create an executor with the default pool size.
    pub fn with_default_pool_size() -> TransferResult<Self> {
        Self::new(DEFAULT_POOL_SIZE)
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Spawn a task onto the pool.
    ///
    /// If the executor has already been shut down the task never runs and
    /// the returned handle resolves to a cancellation error.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Names of the worker threads started so far, in start order.
    #[must_use]
    pub fn started_threads(&self) -> Vec<String> {
        self.threads.workers.lock().clone()
    }

    /// Names of the blocking-offload threads started so far.
    #[must_use]
    pub fn blocking_threads(&self) -> Vec<String> {
        self.threads.blocking.lock().clone()
    }

    /// Number of threads, workers and blocking offload, currently alive.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.threads.live.load(Ordering::SeqCst)
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.runtime.lock().is_none()
    }

    /// Shut the pool down without waiting for its threads.
    ///
    /// Queued and in-flight tasks are dropped, which resolves their join
    /// handles as cancelled. Safe to call repeatedly and from inside a task
    /// running on this executor; returns `true` only for the call that
    /// actually stopped the pool.
    pub fn shutdown(&self) -> bool {
        let runtime = self.runtime.lock().take();
        match runtime {
            Some(runtime) => {
                runtime.shutdown_background();
                debug!(pool_size = self.pool_size, "transfer executor shut down");
                true
            }
            None => false,
        }
    }
}

impl Drop for TransferExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TransferExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferExecutor")
            .field("pool_size", &self.pool_size)
            .field("live_threads", &self.live_threads())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
