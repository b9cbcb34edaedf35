//! Common test utilities for coordinator integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier_transfer::{Transfer, TransferConfig, TransferManager, TransferResult};
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult, UploadPart,
};
use parking_lot::Mutex;

/// What a [`FaultyStore`] does when a key is written.
#[derive(Debug, Clone, Copy, Default)]
pub struct Behaviour {
    /// Time spent before the write goes through.
    pub delay: Duration,
    /// Fail the write once the delay has elapsed.
    pub fail: bool,
    /// Time each multipart part takes.
    pub part_delay: Duration,
    /// Fail every multipart part once its delay has elapsed.
    pub fail_parts: bool,
}

/// In-memory store with per-key write delays and failures.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemory,
    behaviours: Mutex<HashMap<String, Behaviour>>,
    completed_puts: AtomicUsize,
    uploaded_parts: Arc<AtomicUsize>,
    aborted_uploads: Arc<AtomicUsize>,
}

impl FaultyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay writes to `key`.
    pub fn delay(&self, key: &str, delay: Duration) {
        self.behaviours.lock().insert(
            key.to_owned(),
            Behaviour {
                delay,
                ..Behaviour::default()
            },
        );
    }

    /// Fail writes to `key` after `delay`.
    pub fn fail_after(&self, key: &str, delay: Duration) {
        self.behaviours.lock().insert(
            key.to_owned(),
            Behaviour {
                delay,
                fail: true,
                ..Behaviour::default()
            },
        );
    }

    /// Make every multipart part written to `key` take `delay`.
    pub fn slow_parts(&self, key: &str, delay: Duration) {
        self.behaviours.lock().insert(
            key.to_owned(),
            Behaviour {
                part_delay: delay,
                ..Behaviour::default()
            },
        );
    }

    /// Fail every multipart part written to `key` after `delay`.
    pub fn fail_parts(&self, key: &str, delay: Duration) {
        self.behaviours.lock().insert(
            key.to_owned(),
            Behaviour {
                part_delay: delay,
                fail_parts: true,
                ..Behaviour::default()
            },
        );
    }

    /// Number of writes that went through.
    pub fn completed_puts(&self) -> usize {
        self.completed_puts.load(Ordering::SeqCst)
    }

    /// Number of multipart parts that went through.
    pub fn uploaded_parts(&self) -> usize {
        self.uploaded_parts.load(Ordering::SeqCst)
    }

    /// Number of multipart uploads that were aborted.
    pub fn aborted_uploads(&self) -> usize {
        self.aborted_uploads.load(Ordering::SeqCst)
    }

    fn behaviour(&self, location: &Path) -> Behaviour {
        self.behaviours
            .lock()
            .get(location.as_ref())
            .copied()
            .unwrap_or_default()
    }

    async fn apply(&self, location: &Path) -> object_store::Result<()> {
        let behaviour = self.behaviour(location);

        if !behaviour.delay.is_zero() {
            tokio::time::sleep(behaviour.delay).await;
        }
        if behaviour.fail {
            return Err(injected_failure(location));
        }
        Ok(())
    }
}

fn injected_failure(location: &Path) -> object_store::Error {
    object_store::Error::Generic {
        store: "faulty",
        source: format!("injected failure for {location}").into(),
    }
}

/// Multipart upload that applies part behaviour and counts parts and aborts.
#[derive(Debug)]
struct FaultyUpload {
    inner: Box<dyn MultipartUpload>,
    location: Path,
    behaviour: Behaviour,
    uploaded_parts: Arc<AtomicUsize>,
    aborted_uploads: Arc<AtomicUsize>,
}

#[async_trait]
impl MultipartUpload for FaultyUpload {
    fn put_part(&mut self, data: PutPayload) -> UploadPart {
        let part = self.inner.put_part(data);
        let location = self.location.clone();
        let behaviour = self.behaviour;
        let uploaded_parts = Arc::clone(&self.uploaded_parts);

        Box::pin(async move {
            tokio::time::sleep(behaviour.part_delay).await;
            if behaviour.fail_parts {
                return Err(injected_failure(&location));
            }
            part.await?;
            uploaded_parts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    async fn complete(&mut self) -> object_store::Result<PutResult> {
        self.inner.complete().await
    }

    async fn abort(&mut self) -> object_store::Result<()> {
        self.aborted_uploads.fetch_add(1, Ordering::SeqCst);
        self.inner.abort().await
    }
}

impl fmt::Display for FaultyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaultyStore({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.apply(location).await?;
        let result = self.inner.put_opts(location, payload, opts).await?;
        self.completed_puts.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.apply(location).await?;
        let inner = self.inner.put_multipart_opts(location, opts).await?;
        Ok(Box::new(FaultyUpload {
            inner,
            location: location.clone(),
            behaviour: self.behaviour(location),
            uploaded_parts: Arc::clone(&self.uploaded_parts),
            aborted_uploads: Arc::clone(&self.aborted_uploads),
        }))
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

/// Transfer settings with a fast cancellation watcher.
pub fn fast_config(pool_size: usize) -> TransferConfig {
    TransferConfig {
        pool_size,
        watch_interval_ms: 20,
        ..TransferConfig::default()
    }
}

/// Body written for `key`.
pub fn payload(key: &str) -> Bytes {
    Bytes::from(format!("contents of {key}"))
}

/// Issue one in-memory upload per key.
pub fn upload_all(manager: &TransferManager, keys: &[&str]) -> TransferResult<Vec<Transfer>> {
    keys.iter()
        .map(|key| manager.upload_bytes(Path::from(*key), payload(key)))
        .collect()
}

/// Sorted locations of `transfers`.
pub fn locations(transfers: &[Transfer]) -> Vec<String> {
    let mut locations: Vec<String> = transfers.iter().map(|t| t.location().to_string()).collect();
    locations.sort();
    locations
}

/// Poll `condition` until it holds or `deadline` passes.
pub async fn eventually(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
