//! Storage client construction.
//!
//! Supports local filesystem, in-memory and S3-compatible backends.

use std::sync::Arc;

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{TransferError, TransferResult};

/// Create an object store from configuration.
///
/// # Errors
///
/// Returns an error if the object store cannot be created (e.g. invalid path,
/// missing bucket, S3 support compiled out).
pub fn create_object_store(config: &StorageConfig) -> TransferResult<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Local { path } => {
            std::fs::create_dir_all(path).map_err(|e| {
                TransferError::Config(format!(
                    "failed to create storage directory {}: {e}",
                    path.display()
                ))
            })?;
            let store = LocalFileSystem::new_with_prefix(path)?;
            debug!(path = %path.display(), "local storage client created");
            Ok(Arc::new(store))
        }
        StorageConfig::Memory => Ok(Arc::new(InMemory::new())),
        #[cfg(feature = "s3")]
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key_id,
            secret_access_key,
            allow_http,
        } => {
            use object_store::aws::AmazonS3Builder;

            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

            if let Some(r) = region {
                builder = builder.with_region(r);
            }
            if let Some(ref ep) = endpoint {
                builder = builder.with_endpoint(ep);
            }
            if let Some(ref key) = access_key_id {
                builder = builder.with_access_key_id(key);
            }
            if let Some(ref secret) = secret_access_key {
                builder = builder.with_secret_access_key(secret);
            }
            if *allow_http {
                builder = builder.with_allow_http(true);
            }

            let store = builder.build()?;
            debug!(bucket = %bucket, "S3 storage client created");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3 { .. } => Err(TransferError::Config(
            "S3 storage requires the 's3' feature to be enabled".to_owned(),
        )),
    }
}
