//! Interruptible concurrent uploads to object storage.
//!
//! This crate provides:
//! - A dedicated, fixed-size worker pool with named threads
//! - A transfer manager issuing single-part, multipart and directory uploads
//! - A coordinator that waits for a batch of transfers with cooperative
//!   cancellation and guaranteed cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │  WorkUnit    │───▶│   Manager    │───▶│   Executor   │
//! └──────────────┘    └──────────────┘    └──────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Coordinator  │    │ ObjectStore  │    │   Watcher    │
//! └──────────────┘    └──────────────┘    └──────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod manager;
pub mod storage;
pub mod transfer;

// Re-export configuration types
pub use config::{CourierConfig, StorageConfig, TransferConfig};

// Re-export error types
pub use error::{CoordinatorError, CoordinatorResult, TransferError, TransferResult};

// Re-export core types
pub use coordinator::{CancelPredicate, TransferCoordinator, WorkUnit};
pub use executor::TransferExecutor;
pub use manager::TransferManager;
pub use storage::create_object_store;
pub use transfer::{Transfer, TransferProgress, TransferState, Uploaded};
