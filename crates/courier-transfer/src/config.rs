//! Configuration for transfer runs and storage backends.

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::TransferResult;

// ============================================================================
// Default configuration constants
// ============================================================================

/// Default number of worker threads in a transfer executor.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Default interval between polls of a cancellation predicate.
pub const DEFAULT_WATCH_INTERVAL_MS: u64 = 1_000;

/// Default file size above which uploads switch to multipart (16 MiB).
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default multipart part size (8 MiB).
///
/// S3 rejects parts smaller than 5 MiB, except the last one.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Default number of parts uploaded concurrently per multipart transfer.
pub const DEFAULT_PART_CONCURRENCY: usize = 4;

/// Default time in-flight transfers get to clean up after a shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Default local storage path.
pub const DEFAULT_STORAGE_PATH: &str = "./courier-data";

/// Tuning for transfer runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Worker threads in the executor created for a run (minimum 1).
    pub pool_size: usize,
    /// Cancellation predicate polling interval in milliseconds.
    pub watch_interval_ms: u64,
    /// Files larger than this many bytes use multipart uploads.
    pub multipart_threshold: u64,
    /// Multipart part size in bytes.
    pub part_size: usize,
    /// Parts in flight per multipart upload.
    pub part_concurrency: usize,
    /// How long interrupted transfers may take to abort before the executor
    /// is stopped, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl TransferConfig {
    /// Pool size constrained to at least one worker.
    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size.max(1)
    }

    /// Polling interval for cancellation predicates.
    #[must_use]
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(1))
    }

    /// Cleanup window granted to interrupted transfers.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            watch_interval_ms: DEFAULT_WATCH_INTERVAL_MS,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
            part_concurrency: DEFAULT_PART_CONCURRENCY,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Local {
        /// Path to storage directory.
        path: PathBuf,
    },
    /// AWS S3 or S3-compatible storage (MinIO, Garage, etc.).
    S3 {
        /// S3 bucket name.
        bucket: String,
        /// AWS region or custom region for S3-compatible services.
        region: Option<String>,
        /// Custom endpoint URL for S3-compatible services.
        endpoint: Option<String>,
        /// Access key ID (can also be set via AWS_ACCESS_KEY_ID env var).
        access_key_id: Option<String>,
        /// Secret access key (can also be set via AWS_SECRET_ACCESS_KEY env var).
        secret_access_key: Option<String>,
        /// Allow HTTP (non-TLS) connections (for local development).
        #[serde(default)]
        allow_http: bool,
    },
    /// In-memory storage (for testing).
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Local {
            path: PathBuf::from(DEFAULT_STORAGE_PATH),
        }
    }
}

/// Root configuration for the `courier` tool.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Transfer tuning.
    pub transfer: TransferConfig,
    /// Storage backend.
    pub storage: StorageConfig,
}

impl CourierConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order (later sources override earlier):
    /// 1. Default values
    /// 2. `courier.toml` in current directory
    /// 3. Environment variables prefixed with `COURIER_`, nested with `__`
    ///    (e.g. `COURIER_TRANSFER__POOL_SIZE=4`)
    pub fn load() -> TransferResult<Self> {
        Self::load_from("courier.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &str) -> TransferResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("COURIER_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.pool_size(), 10);
        assert_eq!(config.watch_interval(), Duration::from_secs(1));
        assert_eq!(config.multipart_threshold, 16 * 1024 * 1024);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert!(matches!(StorageConfig::default(), StorageConfig::Local { .. }));
    }

    #[test]
    fn pool_size_is_at_least_one() {
        let config = TransferConfig {
            pool_size: 0,
            ..TransferConfig::default()
        };
        assert_eq!(config.pool_size(), 1);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
            [transfer]
            pool_size = 4

            [storage]
            type = "memory"
        "#;

        let config: CourierConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.transfer.pool_size, 4);
        assert_eq!(config.transfer.watch_interval_ms, DEFAULT_WATCH_INTERVAL_MS);
        assert!(matches!(config.storage, StorageConfig::Memory));
    }

    #[test]
    fn parse_s3_storage() {
        let toml = r#"
            type = "s3"
            bucket = "releases"
            region = "eu-west-1"
            endpoint = "http://localhost:3900"
            allow_http = true
        "#;

        let storage: StorageConfig = toml::from_str(toml).unwrap();
        match storage {
            StorageConfig::S3 {
                bucket,
                region,
                allow_http,
                access_key_id,
                ..
            } => {
                assert_eq!(bucket, "releases");
                assert_eq!(region.as_deref(), Some("eu-west-1"));
                assert!(allow_http);
                assert!(access_key_id.is_none());
            }
            other => panic!("expected s3 storage, got {other:?}"),
        }
    }

    #[test]
    fn load_from_missing_file_uses_defaults() {
        let config = CourierConfig::load_from("/nonexistent/courier.toml").unwrap();
        assert_eq!(config.transfer.pool_size, DEFAULT_POOL_SIZE);
    }
}
