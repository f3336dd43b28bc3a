//! Bounded upload dispatcher
//!
//! Each upload runs as its own tokio task holding one semaphore permit, so at
//! most `capacity` transfers run at once. `dispatch` waits for a free permit
//! before returning; that wait is the only backpressure on the watch loop.
//!
//! A file is registered in the [`InFlightRegistry`] before its task is
//! spawned and released when the task ends, whatever the outcome. Failed
//! uploads are not retried here; the next directory scan finds the file again.

use crate::config::JobContext;
use crate::error::UploadError;
use crate::item::{filename, ItemMetadata, UploadTask};
use crate::upload::registry::InFlightRegistry;
use crate::upload::store::{ObjectStoreClient, UploadReceipt};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Upload counters, shared by every task
#[derive(Debug, Default)]
struct DispatchStats {
    /// Uploads handed to a task
    started: AtomicU64,

    /// Uploads that completed
    succeeded: AtomicU64,

    /// Uploads that failed in any phase
    failed: AtomicU64,

    /// Bytes reported by completed uploads
    bytes_uploaded: AtomicU64,

    /// Local files removed after upload
    deleted: AtomicU64,
}

impl DispatchStats {
    fn record_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self, bytes: u64) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delete(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub bytes_uploaded: u64,
    pub deleted: u64,
    pub in_flight: usize,
    pub capacity: usize,
}

/// What `dispatch` did with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Registered and handed to an upload task
    Started,
    /// Already in flight; nothing done
    Duplicate,
    /// The dispatcher was closed; nothing done
    Closed,
}

/// Fixed-capacity pool of upload tasks
#[derive(Clone)]
pub struct UploadDispatcher {
    context: Arc<JobContext>,
    client: Arc<dyn ObjectStoreClient>,
    registry: InFlightRegistry,
    slots: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<DispatchStats>,
    delete_uploaded: bool,
}

impl UploadDispatcher {
    /// Create a dispatcher running at most `capacity` uploads at once
    pub fn new(
        context: Arc<JobContext>,
        client: Arc<dyn ObjectStoreClient>,
        registry: InFlightRegistry,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            context,
            client,
            registry,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(DispatchStats::default()),
            delete_uploaded: false,
        }
    }

    /// Remove local files once they are uploaded
    pub fn with_delete_uploaded(mut self, delete: bool) -> Self {
        self.delete_uploaded = delete;
        self
    }

    /// Start uploading a task, waiting for a free slot first
    ///
    /// Dropping the returned future while it waits for a slot leaves nothing
    /// behind: the file is only registered once a slot is held.
    pub async fn dispatch(&self, task: UploadTask) -> Dispatch {
        if self.registry.contains(&task.filename) {
            return Dispatch::Duplicate;
        }

        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Dispatch::Closed,
        };

        // Recheck under the registry lock; the slot goes back if we lose
        if !self.registry.try_insert(&task.filename, &task.item) {
            return Dispatch::Duplicate;
        }

        self.stats.record_start();
        info!(file = %task.filename, item = %task.item, bytes = task.size, "Uploading file");

        let guard = InFlightGuard {
            registry: self.registry.clone(),
            filename: task.filename.clone(),
            released: false,
        };
        let worker = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            worker.run(task, guard).await;
        });

        Dispatch::Started
    }

    /// Wait until no upload is running
    ///
    /// Returns at once after [`close`](Self::close).
    pub async fn wait_idle(&self) {
        // Holding every permit at once means every task has returned its own
        if let Ok(all) = self.slots.acquire_many(self.capacity as u32).await {
            drop(all);
        }
    }

    /// Refuse all further work
    ///
    /// Running uploads keep their slots. Any `dispatch` waiting for a slot,
    /// and every later one, returns [`Dispatch::Closed`].
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Number of uploads currently running
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            started: self.stats.started.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            bytes_uploaded: self.stats.bytes_uploaded.load(Ordering::Relaxed),
            deleted: self.stats.deleted.load(Ordering::Relaxed),
            in_flight: self.registry.len(),
            capacity: self.capacity,
        }
    }

    /// Body of one upload task
    async fn run(&self, task: UploadTask, mut guard: InFlightGuard) {
        let start = Instant::now();
        let path = self.context.config.warcs_dir.join(&task.filename);

        match self.upload(&path, &task).await {
            Ok(receipt) => {
                self.stats.record_success(receipt.bytes);
                let remember = !(self.delete_uploaded && self.delete_local(&path, &task).await);
                guard.release_uploaded(remember);
                info!(
                    file = %task.filename,
                    item = %task.item,
                    bytes = receipt.bytes,
                    duration_ms = start.elapsed().as_millis() as u64,
                    location = %receipt.location,
                    "Finished uploading file"
                );
            }
            Err(e) => {
                self.stats.record_failure();
                drop(guard);
                let retryable = match &e {
                    UploadError::Session(s) | UploadError::Transfer(s) => s.is_retryable(),
                    _ => false,
                };
                if retryable {
                    warn!(file = %task.filename, item = %task.item, phase = e.phase(), error = %e, "Upload failed, will retry on next scan");
                } else {
                    error!(file = %task.filename, item = %task.item, phase = e.phase(), error = %e, "Upload failed");
                }
            }
        }
    }

    async fn upload(&self, path: &Path, task: &UploadTask) -> Result<UploadReceipt, UploadError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|source| UploadError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let size = file
            .metadata()
            .await
            .map_err(|source| UploadError::Stat {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        drop(file);

        let config = &self.context.config;
        let parsed = filename::parse(&task.filename, config.naming)?;
        let metadata = ItemMetadata::for_file(&parsed, config);
        debug!(file = %task.filename, bytes = size, fields = metadata.pairs().len(), "Opening upload session");

        let session = self
            .client
            .new_session(&self.context.credentials, &metadata)
            .await
            .map_err(UploadError::Session)?;

        session
            .upload(path, &task.item, &task.filename)
            .await
            .map_err(UploadError::Transfer)
    }

    /// Returns true if the file is gone
    async fn delete_local(&self, path: &Path, task: &UploadTask) -> bool {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                self.stats.record_delete();
                debug!(file = %task.filename, "Deleted uploaded file");
                true
            }
            Err(e) => {
                warn!(file = %task.filename, error = %e, "Failed to delete uploaded file");
                false
            }
        }
    }
}

/// Releases a registry entry when an upload task ends, even by panic
struct InFlightGuard {
    registry: InFlightRegistry,
    filename: String,
    released: bool,
}

impl InFlightGuard {
    fn release_uploaded(&mut self, remember: bool) {
        self.registry.mark_uploaded(&self.filename, remember);
        self.released = true;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.released {
            self.registry.remove(&self.filename);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::credentials::Credentials;
    use crate::error::{StoreError, StoreResult};
    use crate::item::NamingConvention;
    use crate::upload::store::UploadSession;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Store whose uploads block until released, tracking concurrency
    #[derive(Default)]
    struct GatedStore {
        gate: Notify,
        open: std::sync::atomic::AtomicBool,
        running: AtomicUsize,
        peak: AtomicUsize,
        fail: bool,
    }

    impl GatedStore {
        fn release(&self) {
            self.open.store(true, Ordering::SeqCst);
            self.gate.notify_waiters();
        }
    }

    struct GatedSession(Arc<GatedStore>);

    #[async_trait::async_trait]
    impl ObjectStoreClient for Arc<GatedStore> {
        async fn new_session(
            &self,
            _credentials: &Credentials,
            _metadata: &ItemMetadata,
        ) -> StoreResult<Box<dyn UploadSession>> {
            Ok(Box::new(GatedSession(Arc::clone(self))))
        }
    }

    #[async_trait::async_trait]
    impl UploadSession for GatedSession {
        async fn upload(&self, _path: &Path, item: &str, key: &str) -> StoreResult<UploadReceipt> {
            let store = &self.0;
            let now = store.running.fetch_add(1, Ordering::SeqCst) + 1;
            store.peak.fetch_max(now, Ordering::SeqCst);

            while !store.open.load(Ordering::SeqCst) {
                let notified = store.gate.notified();
                if store.open.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }

            store.running.fetch_sub(1, Ordering::SeqCst);
            if store.fail {
                return Err(StoreError::Transport {
                    key: key.to_string(),
                    reason: "connection reset".into(),
                });
            }
            Ok(UploadReceipt {
                item: item.to_string(),
                key: key.to_string(),
                bytes: 1,
                location: format!("mem://{}/{}", item, key),
            })
        }
    }

    fn context(dir: &Path) -> Arc<JobContext> {
        let config = JobConfig {
            job: "test".into(),
            warcs_dir: dir.to_path_buf(),
            scan_interval: Duration::from_secs(1),
            item_size_bytes: 1024,
            naming: NamingConvention::Simple,
            description: String::new(),
            operator: String::new(),
            collections: vec![],
            title_prefix: String::new(),
            metadata: BTreeMap::new(),
            derive: false,
        };
        Arc::new(JobContext::new(config, Credentials::new("a", "s")))
    }

    fn task(dir: &Path, serial: u32) -> UploadTask {
        let filename = format!("WEB-20240109170659538-{:05}-h.local.warc.gz", serial);
        std::fs::write(dir.join(&filename), b"x").unwrap();
        UploadTask {
            filename,
            item: "WEB-20240109170659-h.local".into(),
            size: 1,
        }
    }

    fn dispatcher(dir: &Path, store: &Arc<GatedStore>, capacity: usize) -> UploadDispatcher {
        let client: Arc<dyn ObjectStoreClient> = Arc::new(Arc::clone(store));
        UploadDispatcher::new(context(dir), client, InFlightRegistry::new(), capacity)
    }

    #[tokio::test]
    async fn test_duplicate_refused_without_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GatedStore::default());
        let dispatcher = dispatcher(dir.path(), &store, 2);

        let t = task(dir.path(), 1);
        assert_eq!(dispatcher.dispatch(t.clone()).await, Dispatch::Started);
        assert_eq!(dispatcher.dispatch(t).await, Dispatch::Duplicate);
        assert_eq!(dispatcher.in_flight(), 1);
        assert_eq!(dispatcher.slots.available_permits(), 1);

        store.release();
        dispatcher.wait_idle().await;
        assert_eq!(dispatcher.snapshot().succeeded, 1);
        assert!(dispatcher.registry().is_completed(&task(dir.path(), 1).filename));
    }

    #[tokio::test]
    async fn test_dispatch_blocks_when_full() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GatedStore::default());
        let dispatcher = dispatcher(dir.path(), &store, 2);

        assert_eq!(dispatcher.dispatch(task(dir.path(), 1)).await, Dispatch::Started);
        assert_eq!(dispatcher.dispatch(task(dir.path(), 2)).await, Dispatch::Started);

        let third = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.dispatch(task(dir.path(), 3)),
        )
        .await;
        assert!(third.is_err(), "third dispatch should wait for a slot");
        // The abandoned dispatch left nothing registered
        assert_eq!(dispatcher.in_flight(), 2);

        store.release();
        dispatcher.wait_idle().await;
        assert_eq!(store.peak.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.snapshot().started, 2);
    }

    #[tokio::test]
    async fn test_failure_releases_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GatedStore {
            fail: true,
            ..Default::default()
        });
        store.release();
        let dispatcher = dispatcher(dir.path(), &store, 1);

        let t = task(dir.path(), 1);
        dispatcher.dispatch(t.clone()).await;
        dispatcher.wait_idle().await;

        let snap = dispatcher.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.in_flight, 0);
        assert!(!dispatcher.registry().is_known(&t.filename));
    }

    #[tokio::test]
    async fn test_missing_file_fails_in_open_phase() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GatedStore::default());
        store.release();
        let dispatcher = dispatcher(dir.path(), &store, 1);

        let t = task(dir.path(), 1);
        std::fs::remove_file(dir.path().join(&t.filename)).unwrap();
        dispatcher.dispatch(t).await;
        dispatcher.wait_idle().await;

        assert_eq!(dispatcher.snapshot().failed, 1);
        assert_eq!(store.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delete_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GatedStore::default());
        store.release();
        let dispatcher = dispatcher(dir.path(), &store, 1).with_delete_uploaded(true);

        let t = task(dir.path(), 1);
        dispatcher.dispatch(t.clone()).await;
        dispatcher.wait_idle().await;

        assert!(!dir.path().join(&t.filename).exists());
        assert_eq!(dispatcher.snapshot().deleted, 1);
        // Nothing to remember once the file is gone
        assert!(!dispatcher.registry().is_known(&t.filename));
    }

    #[tokio::test]
    async fn test_close_refuses_waiting_and_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GatedStore::default());
        let dispatcher = dispatcher(dir.path(), &store, 1);

        assert_eq!(dispatcher.dispatch(task(dir.path(), 1)).await, Dispatch::Started);

        let waiting = {
            let dispatcher = dispatcher.clone();
            let t = task(dir.path(), 2);
            tokio::spawn(async move { dispatcher.dispatch(t).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        dispatcher.close();
        assert!(dispatcher.is_closed());
        assert_eq!(waiting.await.unwrap(), Dispatch::Closed);
        assert_eq!(dispatcher.dispatch(task(dir.path(), 3)).await, Dispatch::Closed);

        // The running upload keeps its registration, the refused ones never had one
        assert_eq!(dispatcher.in_flight(), 1);
        assert_eq!(dispatcher.snapshot().started, 1);
        store.release();
    }
}
