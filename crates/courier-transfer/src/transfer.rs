//! In-flight transfer handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use object_store::path::Path as ObjectPath;
use object_store::PutResult;
use tokio::task::JoinHandle;

use crate::error::{TransferError, TransferResult};

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransferState {
    /// Issued but not yet picked up by a worker.
    Queued = 0,
    /// Bytes are moving.
    InProgress = 1,
    /// Finished successfully.
    Completed = 2,
    /// Finished with an error.
    Failed = 3,
    /// Interrupted before finishing.
    Canceled = 4,
}

impl TransferState {
    /// Whether the state is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// String representation for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Queued,
            1 => Self::InProgress,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Canceled,
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state between a [`Transfer`], its task and the manager.
///
/// Transitions into a terminal state happen at most once: whichever of the
/// task or a manager shutdown gets there first wins.
#[derive(Debug)]
pub(crate) struct TransferStatus {
    state: AtomicU8,
    bytes_transferred: AtomicU64,
    total_bytes: AtomicU64,
}

impl TransferStatus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(TransferState::Queued as u8),
            bytes_transferred: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        })
    }

    pub(crate) fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Queued -> InProgress. Returns false if the transfer was already canceled.
    pub(crate) fn start(&self) -> bool {
        self.state
            .compare_exchange(
                TransferState::Queued as u8,
                TransferState::InProgress as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Move a non-terminal transfer into `to`. Returns false if it was
    /// already terminal.
    pub(crate) fn finish(&self, to: TransferState) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if TransferState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn set_total(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_transferred(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    fn progress(&self) -> TransferProgress {
        TransferProgress {
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of how far a transfer has got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes handed to the store so far.
    pub bytes_transferred: u64,
    /// Total size, or 0 while unknown.
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`, if the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        (self.total_bytes > 0)
            .then(|| (self.bytes_transferred as f64 / self.total_bytes as f64).min(1.0))
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    /// Where the object was written.
    pub location: ObjectPath,
    /// Object size in bytes.
    pub size: u64,
    /// Entity tag reported by the store.
    pub e_tag: Option<String>,
    /// Object version reported by the store, if versioning is enabled.
    pub version: Option<String>,
}

impl Uploaded {
    pub(crate) fn new(location: ObjectPath, size: u64, put: PutResult) -> Self {
        Self {
            location,
            size,
            e_tag: put.e_tag,
            version: put.version,
        }
    }
}

/// Handle to one upload issued through a
/// [`TransferManager`](crate::TransferManager).
///
/// The transfer runs on the manager's executor whether or not anyone waits
/// for it.
pub struct Transfer {
    location: ObjectPath,
    status: Arc<TransferStatus>,
    task: Option<JoinHandle<TransferResult<Uploaded>>>,
    outcome: Option<Uploaded>,
}

impl Transfer {
    pub(crate) fn new(
        location: ObjectPath,
        status: Arc<TransferStatus>,
        task: JoinHandle<TransferResult<Uploaded>>,
    ) -> Self {
        Self {
            location,
            status,
            task: Some(task),
            outcome: None,
        }
    }

    /// Destination of the transfer.
    #[must_use]
    pub const fn location(&self) -> &ObjectPath {
        &self.location
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.status.state()
    }

    /// Current progress.
    #[must_use]
    pub fn progress(&self) -> TransferProgress {
        self.status.progress()
    }

    /// Outcome of a completed wait, if any.
    #[must_use]
    pub const fn outcome(&self) -> Option<&Uploaded> {
        self.outcome.as_ref()
    }

    /// Suspend until the transfer reaches a terminal state.
    ///
    /// Returns [`TransferError::Interrupted`] if the transfer was cancelled,
    /// including when its executor was shut down underneath it. After a
    /// success further calls return the same outcome immediately.
    pub async fn wait_for_completion(&mut self) -> TransferResult<&Uploaded> {
        if self.outcome.is_some() {
            return self.outcome.as_ref().ok_or(TransferError::Interrupted);
        }

        let Some(task) = self.task.take() else {
            return Err(TransferError::Unavailable {
                location: self.location.to_string(),
                state: self.state(),
            });
        };

        match task.await {
            Ok(Ok(uploaded)) => Ok(self.outcome.insert(uploaded)),
            Ok(Err(e)) => Err(e),
            Err(e) if e.is_cancelled() => {
                self.status.finish(TransferState::Canceled);
                Err(TransferError::Interrupted)
            }
            Err(e) => {
                self.status.finish(TransferState::Failed);
                Err(TransferError::Panicked(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("location", &self.location.as_ref())
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}
