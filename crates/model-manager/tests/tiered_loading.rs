//! End-to-end behaviour of the tiered loader against a directory-backed
//! remote store and an in-process origin.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use common::error::{Error, Result};
use common::models::ArtifactId;
use common::types::{ArtifactSource, LoadState};
use model_manager::{ArtifactLoader, LocalCacheStore, OriginFetcher, OriginSource, RemoteBlobStore};
use storage_adapter::{BlobDescriptor, BlobStore, FilesystemBlobStore};

const MANIFEST: &str = "config.json";

/// Directory-backed store that counts calls and can refuse uploads
struct CountingStore {
    inner: FilesystemBlobStore,
    lists: AtomicUsize,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
    fail_uploads: bool,
}

impl CountingStore {
    fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: FilesystemBlobStore::new(root),
            lists: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            fail_uploads: false,
        })
    }

    fn failing_uploads(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: FilesystemBlobStore::new(root),
            lists: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            fail_uploads: true,
        })
    }

    fn calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst) + self.downloads.load(Ordering::SeqCst) + self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingStore {
    fn location(&self) -> &str {
        self.inner.location()
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobDescriptor>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(prefix).await
    }

    async fn download(&self, object: &str, destination: &Path) -> Result<u64> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.inner.download(object, destination).await
    }

    async fn upload(&self, source: &Path, object: &str) -> Result<u64> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads {
            return Err(Error::Upload("bucket is read-only".into()));
        }
        self.inner.upload(source, object).await
    }
}

/// Store whose calls never finish in time
struct HangingStore {
    root: PathBuf,
    calls: AtomicUsize,
}

#[async_trait]
impl BlobStore for HangingStore {
    fn location(&self) -> &str {
        "hanging://bucket"
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<BlobDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn download(&self, _object: &str, _destination: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(0)
    }

    async fn upload(&self, _source: &Path, _object: &str) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(Error::Upload(format!("{} is unreachable", self.root.display())))
    }
}

/// Origin that writes a small model and counts fetches
struct FakeOrigin {
    calls: AtomicUsize,
    delay: Duration,
    /// Only this identifier is delayed, when set
    slow_id: Option<ArtifactId>,
    deny: AtomicBool,
}

impl FakeOrigin {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            slow_id: None,
            deny: AtomicBool::new(false),
        })
    }

    fn slow_for(slow: ArtifactId, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            slow_id: Some(slow),
            deny: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginSource for FakeOrigin {
    fn name(&self) -> &str {
        "fake-hub"
    }

    async fn materialize(&self, id: &ArtifactId, destination: &Path, _credential: Option<&str>) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delayed = self.slow_id.as_ref().map_or(true, |slow| slow == id);
        if delayed && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::AuthRequired(format!("{} is gated", id)));
        }

        write_model(destination);
        Ok(3)
    }
}

fn write_model(entry: &Path) {
    std::fs::create_dir_all(entry.join("tokenizer")).unwrap();
    std::fs::write(entry.join("weights.bin"), vec![7u8; 32]).unwrap();
    std::fs::write(entry.join("tokenizer").join("vocab.txt"), "hello world").unwrap();
    std::fs::write(entry.join(MANIFEST), r#"{"model_type":"echo"}"#).unwrap();
}

fn id(value: &str) -> ArtifactId {
    ArtifactId::parse(value).unwrap()
}

struct Harness {
    cache: PathBuf,
    store: Option<Arc<CountingStore>>,
    origin: Arc<FakeOrigin>,
    background: bool,
}

impl Harness {
    fn new(cache: &Path, store: Option<Arc<CountingStore>>, origin: Arc<FakeOrigin>) -> Self {
        Self {
            cache: cache.to_path_buf(),
            store,
            origin,
            background: true,
        }
    }

    fn loader(&self) -> ArtifactLoader {
        let local = LocalCacheStore::new(&self.cache, MANIFEST);
        let origin = OriginFetcher::new(self.origin.clone(), Duration::from_secs(10), MANIFEST);
        let remote = self.store.clone().map(|store| {
            let store: Arc<dyn BlobStore> = store;
            RemoteBlobStore::new(store, Duration::from_secs(10), MANIFEST)
        });

        ArtifactLoader::builder(local, origin)
            .maybe_remote(remote)
            .background_write_back(self.background)
            .build()
    }
}

#[tokio::test]
async fn local_hit_touches_no_other_tier() {
    let cache = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    write_model(&cache.path().join("acme--widget"));

    let store = CountingStore::new(bucket.path());
    let harness = Harness::new(cache.path(), Some(store.clone()), FakeOrigin::new());
    let artifact = harness.loader().ensure_loaded(&id("acme/widget")).await.unwrap();

    assert_eq!(artifact.source, ArtifactSource::Local);
    assert_eq!(store.calls(), 0);
    assert_eq!(harness.origin.calls(), 0);
}

#[tokio::test]
async fn remote_hit_populates_local_without_origin() {
    let cache = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    write_model(&bucket.path().join("models/acme--widget"));

    let store = CountingStore::new(bucket.path());
    let harness = Harness::new(cache.path(), Some(store.clone()), FakeOrigin::new());
    let artifact = harness.loader().ensure_loaded(&id("acme/widget")).await.unwrap();

    assert_eq!(artifact.source, ArtifactSource::Remote);
    assert_eq!(artifact.files.len(), 3);
    assert_eq!(store.downloads.load(Ordering::SeqCst), 3);
    assert_eq!(store.uploads.load(Ordering::SeqCst), 0);
    assert_eq!(harness.origin.calls(), 0);
    assert!(cache.path().join("acme--widget").join(MANIFEST).is_file());
}

#[tokio::test]
async fn origin_fetch_is_written_back_and_reused() {
    let bucket = TempDir::new().unwrap();
    let first_cache = TempDir::new().unwrap();
    let widget = id("acme/widget");

    // Nothing cached anywhere: the origin is consulted and the entry written back.
    let first = Harness::new(first_cache.path(), Some(CountingStore::new(bucket.path())), FakeOrigin::new());
    let loader = first.loader();
    let artifact = loader.ensure_loaded(&widget).await.unwrap();
    assert_eq!(artifact.source, ArtifactSource::Origin);
    assert_eq!(first.origin.calls(), 1);

    loader.wait_for_write_back(&widget).await;
    let remote_entry = bucket.path().join("models").join("acme--widget");
    assert!(remote_entry.join(MANIFEST).is_file());
    assert!(remote_entry.join("weights.bin").is_file());
    assert!(remote_entry.join("tokenizer").join("vocab.txt").is_file());

    // A fresh instance with an empty disk restores from the remote tier.
    let second_cache = TempDir::new().unwrap();
    let second = Harness::new(second_cache.path(), Some(CountingStore::new(bucket.path())), FakeOrigin::new());
    let artifact = second.loader().ensure_loaded(&widget).await.unwrap();
    assert_eq!(artifact.source, ArtifactSource::Remote);
    assert_eq!(second.origin.calls(), 0);

    // A restart on the first disk hits locally.
    let store = CountingStore::new(bucket.path());
    let third = Harness::new(first_cache.path(), Some(store.clone()), FakeOrigin::new());
    let artifact = third.loader().ensure_loaded(&widget).await.unwrap();
    assert_eq!(artifact.source, ArtifactSource::Local);
    assert_eq!(store.calls(), 0);
    assert_eq!(third.origin.calls(), 0);
}

#[tokio::test]
async fn inline_write_back_completes_before_return() {
    let cache = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();

    let mut harness = Harness::new(cache.path(), Some(CountingStore::new(bucket.path())), FakeOrigin::new());
    harness.background = false;
    harness.loader().ensure_loaded(&id("acme/widget")).await.unwrap();

    assert!(bucket.path().join("models/acme--widget").join(MANIFEST).is_file());
}

#[tokio::test]
async fn repeated_calls_return_the_same_handle() {
    let cache = TempDir::new().unwrap();
    let harness = Harness::new(cache.path(), None, FakeOrigin::new());
    let loader = harness.loader();
    let widget = id("acme/widget");

    let first = loader.ensure_loaded(&widget).await.unwrap();
    let second = loader.ensure_loaded(&widget).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(harness.origin.calls(), 1);
    assert_eq!(loader.status(&widget), LoadState::Loaded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_load() {
    let cache = TempDir::new().unwrap();
    let harness = Harness::new(cache.path(), None, FakeOrigin::with_delay(Duration::from_millis(300)));
    let loader = harness.loader();
    let widget = id("acme/widget");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let loader = loader.clone();
            let widget = widget.clone();
            tokio::spawn(async move { loader.ensure_loaded(&widget).await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }

    assert_eq!(harness.origin.calls(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_a_failure_and_can_retry() {
    let cache = TempDir::new().unwrap();
    let harness = Harness::new(cache.path(), None, FakeOrigin::with_delay(Duration::from_millis(300)));
    harness.origin.deny.store(true, Ordering::SeqCst);
    let loader = harness.loader();
    let gated = id("gated/model");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let loader = loader.clone();
            let gated = gated.clone();
            tokio::spawn(async move { loader.ensure_loaded(&gated).await })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().unwrap_err().is_auth_required());
    }
    assert_eq!(harness.origin.calls(), 1);
    assert_eq!(loader.status(&gated), LoadState::Failed);
    assert!(loader.artifact(&gated).unwrap_err().is_not_loaded());

    harness.origin.deny.store(false, Ordering::SeqCst);
    let artifact = loader.ensure_loaded(&gated).await.unwrap();
    assert_eq!(artifact.source, ArtifactSource::Origin);
    assert_eq!(harness.origin.calls(), 2);
    assert_eq!(loader.status(&gated), LoadState::Loaded);
}

#[tokio::test]
async fn directory_without_manifest_is_a_miss() {
    let cache = TempDir::new().unwrap();
    let entry = cache.path().join("acme--widget");
    std::fs::create_dir_all(&entry).unwrap();
    std::fs::write(entry.join("weights.bin"), b"partial").unwrap();

    let harness = Harness::new(cache.path(), None, FakeOrigin::new());
    let artifact = harness.loader().ensure_loaded(&id("acme/widget")).await.unwrap();

    assert_eq!(artifact.source, ArtifactSource::Origin);
    assert_eq!(harness.origin.calls(), 1);
}

#[tokio::test]
async fn incomplete_remote_entry_falls_back_to_origin() {
    let cache = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    let remote_entry = bucket.path().join("models/acme--widget");
    std::fs::create_dir_all(&remote_entry).unwrap();
    std::fs::write(remote_entry.join("weights.bin"), b"partial").unwrap();

    let harness = Harness::new(cache.path(), Some(CountingStore::new(bucket.path())), FakeOrigin::new());
    let artifact = harness.loader().ensure_loaded(&id("acme/widget")).await.unwrap();

    assert_eq!(artifact.source, ArtifactSource::Origin);
    assert_eq!(harness.origin.calls(), 1);
}

#[tokio::test]
async fn unreachable_remote_falls_back_to_origin() {
    let cache = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    // A plain file cannot serve as a bucket root, so every call fails.
    let not_a_dir = scratch.path().join("bucket");
    std::fs::write(&not_a_dir, b"").unwrap();
    let store = CountingStore::new(&not_a_dir);

    let harness = Harness::new(cache.path(), Some(store.clone()), FakeOrigin::new());
    let loader = harness.loader();
    let widget = id("acme/widget");
    let artifact = loader.ensure_loaded(&widget).await.unwrap();
    loader.wait_for_write_back(&widget).await;

    assert_eq!(artifact.source, ArtifactSource::Origin);
    assert_eq!(store.lists.load(Ordering::SeqCst), 1);
    assert_eq!(loader.status(&widget), LoadState::Loaded);
}

#[tokio::test]
async fn failed_write_back_is_not_fatal() {
    let cache = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    let store = CountingStore::failing_uploads(bucket.path());

    let harness = Harness::new(cache.path(), Some(store.clone()), FakeOrigin::new());
    let loader = harness.loader();
    let widget = id("acme/widget");
    let artifact = loader.ensure_loaded(&widget).await.unwrap();
    loader.wait_for_write_back(&widget).await;

    assert_eq!(artifact.source, ArtifactSource::Origin);
    assert!(store.uploads.load(Ordering::SeqCst) >= 1);
    assert_eq!(loader.status(&widget), LoadState::Loaded);
    assert!(Arc::ptr_eq(&artifact, &loader.artifact(&widget).unwrap()));
}

#[tokio::test]
async fn similar_identifiers_do_not_share_entries() {
    let cache = TempDir::new().unwrap();
    let harness = Harness::new(cache.path(), None, FakeOrigin::new());
    let loader = harness.loader();

    let slashed = loader.ensure_loaded(&id("a/b")).await.unwrap();
    let dashed = loader.ensure_loaded(&id("a-b")).await.unwrap();

    assert_ne!(slashed.root, dashed.root);
    assert_eq!(harness.origin.calls(), 2);
    assert!(cache.path().join("a--b").join(MANIFEST).is_file());
    assert!(cache.path().join("a-b").join(MANIFEST).is_file());
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_local_hit_fails_without_repair() {
    let cache = TempDir::new().unwrap();
    let bucket = TempDir::new().unwrap();
    let entry = cache.path().join("acme--widget");
    write_model(&entry);
    // The marker is present but the entry cannot be walked.
    std::os::unix::fs::symlink(entry.join("missing-target"), entry.join("dangling")).unwrap();
    write_model(&bucket.path().join("models/acme--widget"));

    let store = CountingStore::new(bucket.path());
    let harness = Harness::new(cache.path(), Some(store.clone()), FakeOrigin::new());
    let loader = harness.loader();
    let widget = id("acme/widget");

    let err = loader.ensure_loaded(&widget).await.unwrap_err();
    assert!(err.is_storage());
    assert_eq!(loader.status(&widget), LoadState::Failed);
    assert_eq!(store.calls(), 0);
    assert_eq!(harness.origin.calls(), 0);
}

#[tokio::test]
async fn hanging_remote_times_out_and_falls_back_to_origin() {
    let cache = TempDir::new().unwrap();
    let store = Arc::new(HangingStore {
        root: PathBuf::from("/unreachable"),
        calls: AtomicUsize::new(0),
    });
    let origin = FakeOrigin::new();

    let remote_store: Arc<dyn BlobStore> = store.clone();
    let loader = ArtifactLoader::builder(
        LocalCacheStore::new(cache.path(), MANIFEST),
        OriginFetcher::new(origin.clone(), Duration::from_secs(10), MANIFEST),
    )
    .maybe_remote(Some(RemoteBlobStore::new(remote_store, Duration::from_millis(50), MANIFEST)))
    .build();

    let widget = id("acme/widget");
    let artifact = tokio::time::timeout(Duration::from_secs(5), loader.ensure_loaded(&widget))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(artifact.source, ArtifactSource::Origin);
    assert_eq!(origin.calls(), 1);

    // The write-back hits the same timeout and is dropped.
    tokio::time::timeout(Duration::from_secs(5), loader.wait_for_write_back(&widget))
        .await
        .unwrap();
    assert!(store.calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(loader.status(&widget), LoadState::Loaded);
}

#[tokio::test]
async fn hanging_origin_times_out_and_fails() {
    let cache = TempDir::new().unwrap();
    let origin = FakeOrigin::with_delay(Duration::from_secs(30));
    let loader = ArtifactLoader::builder(
        LocalCacheStore::new(cache.path(), MANIFEST),
        OriginFetcher::new(origin.clone(), Duration::from_millis(50), MANIFEST),
    )
    .build();

    let widget = id("acme/widget");
    let err = tokio::time::timeout(Duration::from_secs(5), loader.ensure_loaded(&widget))
        .await
        .unwrap()
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(loader.status(&widget), LoadState::Failed);
    assert!(!cache.path().join("acme--widget").join(MANIFEST).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_load_does_not_block_other_identifiers() {
    let cache = TempDir::new().unwrap();
    let slow = id("acme/slow");
    let harness = Harness::new(cache.path(), None, FakeOrigin::slow_for(slow.clone(), Duration::from_secs(5)));
    let loader = harness.loader();

    let background = loader.clone();
    let slow_id = slow.clone();
    let pending = tokio::spawn(async move { background.ensure_loaded(&slow_id).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(loader.status(&slow), LoadState::Loading);

    let fast = tokio::time::timeout(Duration::from_secs(2), loader.ensure_loaded(&id("acme/fast")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fast.source, ArtifactSource::Origin);
    assert_eq!(loader.status(&slow), LoadState::Loading);

    pending.abort();
}

#[tokio::test]
async fn opaque_marker_loads() {
    let cache = TempDir::new().unwrap();
    let entry = cache.path().join("acme--widget");
    std::fs::create_dir_all(&entry).unwrap();
    std::fs::write(entry.join("model.safetensors"), [0u8, 159, 146, 150, 1, 2]).unwrap();

    let origin = FakeOrigin::new();
    let loader = ArtifactLoader::builder(
        LocalCacheStore::new(cache.path(), "model.safetensors"),
        OriginFetcher::new(origin.clone(), Duration::from_secs(10), "model.safetensors"),
    )
    .build();

    let artifact = loader.ensure_loaded(&id("acme/widget")).await.unwrap();
    assert_eq!(artifact.source, ArtifactSource::Local);
    assert!(artifact.manifest.is_none());
    assert_eq!(origin.calls(), 0);
}
