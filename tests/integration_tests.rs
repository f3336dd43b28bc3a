//! Integration tests for warc-drain
//!
//! These run the whole watch/assemble/dispatch pipeline against a temporary
//! directory and an in-memory object store.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Semaphore;
use warc_drain::config::{JobConfig, JobContext};
use warc_drain::credentials::Credentials;
use warc_drain::error::{ConfigError, StoreError, StoreResult};
use warc_drain::item::ItemMetadata;
use warc_drain::upload::{
    InFlightRegistry, ObjectStoreClient, UploadDispatcher, UploadReceipt, UploadSession,
};
use warc_drain::watcher::{shutdown, WatchLoop, WatchOutcome, WatchResult};
use warc_drain::NamingConvention;

/// In-memory store recording every attempt
struct TestStore {
    uploads: Mutex<Vec<(String, String)>>,
    attempts: Mutex<HashMap<String, usize>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    gate: Option<Semaphore>,
    fail_first_attempt: bool,
}

impl TestStore {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::plain()
        })
    }

    /// Uploads block until `open_gate` is called
    fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::plain()
        })
    }

    fn flaky() -> Arc<Self> {
        Arc::new(Self {
            fail_first_attempt: true,
            ..Self::plain()
        })
    }

    fn plain() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::ZERO,
            gate: None,
            fail_first_attempt: false,
        }
    }

    fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn uploaded(&self) -> usize {
        self.uploads.lock().len()
    }

    fn total_attempts(&self) -> usize {
        self.attempts.lock().values().sum()
    }
}

struct StoreHandle(Arc<TestStore>);

struct TestSession(Arc<TestStore>);

#[async_trait::async_trait]
impl ObjectStoreClient for StoreHandle {
    async fn new_session(
        &self,
        _credentials: &Credentials,
        _metadata: &ItemMetadata,
    ) -> StoreResult<Box<dyn UploadSession>> {
        Ok(Box::new(TestSession(Arc::clone(&self.0))))
    }
}

#[async_trait::async_trait]
impl UploadSession for TestSession {
    async fn upload(&self, local_path: &Path, item: &str, key: &str) -> StoreResult<UploadReceipt> {
        let store = &self.0;
        let attempt = {
            let mut attempts = store.attempts.lock();
            let n = attempts.entry(key.to_string()).or_default();
            *n += 1;
            *n
        };

        let now = store.running.fetch_add(1, Ordering::SeqCst) + 1;
        store.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &store.gate {
            let _ = gate.acquire().await;
        }
        if !store.delay.is_zero() {
            tokio::time::sleep(store.delay).await;
        }

        store.running.fetch_sub(1, Ordering::SeqCst);

        if store.fail_first_attempt && attempt == 1 {
            return Err(StoreError::Status {
                item: item.to_string(),
                key: key.to_string(),
                status: 503,
                body: "slow down".into(),
            });
        }

        let bytes = std::fs::metadata(local_path)
            .map_err(|source| StoreError::Local {
                path: local_path.to_path_buf(),
                source,
            })?
            .len();
        store
            .uploads
            .lock()
            .push((item.to_string(), key.to_string()));

        Ok(UploadReceipt {
            item: item.to_string(),
            key: key.to_string(),
            bytes,
            location: format!("mem://{}/{}", item, key),
        })
    }
}

fn job(dir: &Path, naming: NamingConvention, item_size_bytes: u64) -> JobConfig {
    JobConfig {
        job: "integration".into(),
        warcs_dir: dir.to_path_buf(),
        scan_interval: Duration::from_millis(20),
        item_size_bytes,
        naming,
        description: "test crawl".into(),
        operator: "ops@example.org".into(),
        collections: vec!["test".into()],
        title_prefix: "Test".into(),
        metadata: BTreeMap::new(),
        derive: false,
    }
}

fn write_warcs(dir: &Path, count: u32, size: usize) -> Vec<String> {
    (1..=count)
        .map(|serial| {
            let name = format!("WEB-20240109170659538-{:05}-crawler.example.org.warc.gz", serial);
            std::fs::write(dir.join(&name), vec![0u8; size]).unwrap();
            name
        })
        .collect()
}

struct Harness {
    dispatcher: UploadDispatcher,
    controller: shutdown::ShutdownController,
    handle: tokio::task::JoinHandle<WatchResult>,
}

fn start(config: JobConfig, store: &Arc<TestStore>, threads: usize) -> Harness {
    let context = Arc::new(JobContext::new(config, Credentials::new("access", "secret")));
    let client: Arc<dyn ObjectStoreClient> = Arc::new(StoreHandle(Arc::clone(store)));
    let dispatcher = UploadDispatcher::new(
        Arc::clone(&context),
        client,
        InFlightRegistry::new(),
        threads,
    );

    let (controller, listener) = shutdown::channel();
    let mut watcher = WatchLoop::new(context, dispatcher.clone());
    let handle = tokio::spawn(async move { watcher.run(listener).await });

    Harness {
        dispatcher,
        controller,
        handle,
    }
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_file_uploaded_once_within_bound() {
    let dir = tempdir().unwrap();
    let names = write_warcs(dir.path(), 10, 1);
    let store = TestStore::new(Duration::from_millis(30));

    let harness = start(job(dir.path(), NamingConvention::Simple, 4), &store, 3);
    wait_until("all uploads", || store.uploaded() == 10).await;

    harness.controller.signal();
    let result = harness.handle.await.unwrap();

    assert_eq!(result.outcome, WatchOutcome::Drained);
    assert!(store.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(store.total_attempts(), 10, "no file may be sent twice");

    // Budget of 4 one-byte files per item; one host, so one item name
    let uploads = store.uploads.lock().clone();
    let item_of: HashMap<_, _> = uploads.iter().map(|(item, key)| (key.clone(), item.clone())).collect();
    assert_eq!(item_of.len(), names.len());
    assert_eq!(result.items, 3);
    let expected = "WEB-20240109170659-crawler.example.org";
    assert!(item_of.values().all(|item| item == expected));
    assert_eq!(result.uploads.succeeded, 10);
    assert_eq!(result.uploads.bytes_uploaded, 10);
    assert_eq!(harness.dispatcher.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_files_arriving_later_are_picked_up() {
    let dir = tempdir().unwrap();
    write_warcs(dir.path(), 2, 1);
    let store = TestStore::new(Duration::ZERO);

    let harness = start(job(dir.path(), NamingConvention::Simple, 1024), &store, 2);
    wait_until("first batch", || store.uploaded() == 2).await;

    write_warcs(dir.path(), 5, 1);
    wait_until("second batch", || store.uploaded() == 5).await;

    harness.controller.signal();
    let result = harness.handle.await.unwrap();
    assert_eq!(result.outcome, WatchOutcome::Drained);
    assert_eq!(store.total_attempts(), 5);
    // All five fit in the item opened on the first scan
    assert_eq!(result.items, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_shutdown_waits_and_stops_dispatch() {
    let dir = tempdir().unwrap();
    write_warcs(dir.path(), 5, 1);
    let store = TestStore::gated();

    let harness = start(job(dir.path(), NamingConvention::Simple, 1024), &store, 2);
    wait_until("two running uploads", || {
        store.running.load(Ordering::SeqCst) == 2
    })
    .await;

    harness.controller.signal();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !harness.handle.is_finished(),
        "drain must wait for running uploads"
    );

    store.open_gate();
    let result = harness.handle.await.unwrap();

    assert_eq!(result.outcome, WatchOutcome::Drained);
    assert_eq!(result.uploads.started, 2, "nothing dispatched after shutdown");
    assert_eq!(store.uploaded(), 2);
    assert_eq!(harness.dispatcher.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_forced_shutdown_does_not_wait() {
    let dir = tempdir().unwrap();
    write_warcs(dir.path(), 3, 1);
    let store = TestStore::gated();

    let harness = start(job(dir.path(), NamingConvention::Simple, 1024), &store, 2);
    wait_until("two running uploads", || {
        store.running.load(Ordering::SeqCst) == 2
    })
    .await;

    harness.controller.signal();
    harness.controller.signal();

    let result = tokio::time::timeout(Duration::from_secs(2), harness.handle)
        .await
        .expect("forced shutdown should return promptly")
        .unwrap();
    assert_eq!(result.outcome, WatchOutcome::Abandoned { outstanding: 2 });
    assert_eq!(store.uploaded(), 0);
    assert!(harness.dispatcher.is_closed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_upload_retried_by_next_scan() {
    let dir = tempdir().unwrap();
    let names = write_warcs(dir.path(), 1, 8);
    let store = TestStore::flaky();

    let harness = start(job(dir.path(), NamingConvention::Simple, 1024), &store, 1);
    wait_until("retried upload", || store.uploaded() == 1).await;

    harness.controller.signal();
    let result = harness.handle.await.unwrap();

    assert_eq!(store.attempts.lock()[&names[0]], 2);
    assert_eq!(result.uploads.failed, 1);
    assert_eq!(result.uploads.succeeded, 1);
    // Retries reuse the open item
    assert_eq!(result.items, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_naming_uploads_nothing_but_keeps_running() {
    let dir = tempdir().unwrap();
    write_warcs(dir.path(), 3, 1);
    let store = TestStore::new(Duration::ZERO);

    let harness = start(job(dir.path(), NamingConvention::Unknown(9), 1024), &store, 2);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!harness.handle.is_finished());

    harness.controller.signal();
    let result = harness.handle.await.unwrap();
    assert_eq!(result.outcome, WatchOutcome::Drained);
    assert!(result.ticks >= 1);
    assert_eq!(store.total_attempts(), 0);
    assert_eq!(result.items, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_uploaded_removes_files() {
    let dir = tempdir().unwrap();
    let names = write_warcs(dir.path(), 3, 4);
    let store = TestStore::new(Duration::ZERO);

    let context = Arc::new(JobContext::new(
        job(dir.path(), NamingConvention::Simple, 1024),
        Credentials::new("access", "secret"),
    ));
    let client: Arc<dyn ObjectStoreClient> = Arc::new(StoreHandle(Arc::clone(&store)));
    let dispatcher =
        UploadDispatcher::new(Arc::clone(&context), client, InFlightRegistry::new(), 2)
            .with_delete_uploaded(true);
    let (controller, listener) = shutdown::channel();
    let mut watcher = WatchLoop::new(context, dispatcher);
    let handle = tokio::spawn(async move { watcher.run(listener).await });

    wait_until("files removed", || {
        names.iter().all(|n| !dir.path().join(n).exists())
    })
    .await;

    controller.signal();
    let result = handle.await.unwrap();
    assert_eq!(result.uploads.deleted, 3);
    assert_eq!(result.uploads.bytes_uploaded, 12);
}

#[test]
fn test_job_config_files() {
    let dir = tempdir().unwrap();

    let json = dir.path().join("job.json");
    std::fs::write(
        &json,
        r#"{"job": "j", "warcs": "/warcs", "scan_interval": 60, "item_size": 1, "warc_naming": 1}"#,
    )
    .unwrap();
    let config = JobConfig::load(&json).unwrap();
    assert_eq!(config.item_size_bytes, 1024 * 1024 * 1024);
    assert_eq!(config.naming, NamingConvention::Simple);

    let yaml = dir.path().join("draintasker.yaml");
    std::fs::write(
        &yaml,
        "crawljob: j\njob_dir: /warcs\nsleep_time: 60\nmax_size: 2\nWARC_naming: 2\n",
    )
    .unwrap();
    let config = JobConfig::load(&yaml).unwrap();
    assert_eq!(config.item_size_bytes, 2 * 1024 * 1024 * 1024);
    assert_eq!(config.naming, NamingConvention::ProcessQualified);

    let junk = dir.path().join("junk.conf");
    std::fs::write(&junk, "not a config").unwrap();
    assert!(matches!(
        JobConfig::load(&junk),
        Err(ConfigError::UnknownFormat { .. })
    ));

    assert!(matches!(
        JobConfig::load(&dir.path().join("missing.json")),
        Err(ConfigError::Unreadable { .. })
    ));
}
