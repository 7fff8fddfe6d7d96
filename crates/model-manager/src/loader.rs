//! Model loader implementation
//!
//! [`ArtifactLoader::ensure_loaded`] resolves a model through the local
//! cache, the remote blob store and the origin, in that order, and keeps the
//! result in memory for the life of the process.
//!
//! Each identifier has its own slot. The first caller starts a load task and
//! every concurrent caller awaits the same task, so a model is fetched at most
//! once no matter how many requests arrive while it is loading. The load runs
//! in a spawned task: a caller that goes away does not abandon the others.

use std::sync::Arc;
use std::time::Instant;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::error::{Error, Result};
use common::models::{ArtifactId, CacheKey};
use common::types::{ArtifactSource, LoadState};
use common::utils::{format_bytes, format_duration};

use crate::artifact::LoadedArtifact;
use crate::cache_key::CacheKeyResolver;
use crate::local::LocalCacheStore;
use crate::origin::OriginFetcher;
use crate::remote::RemoteBlobStore;

type LoadResult = Result<Arc<LoadedArtifact>>;

/// In-flight load shared by every waiter
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

enum Phase {
    Unloaded,
    Loading(SharedLoad),
    Loaded(Arc<LoadedArtifact>),
    Failed(Error),
}

impl Phase {
    fn state(&self) -> LoadState {
        match self {
            Phase::Unloaded => LoadState::Unloaded,
            Phase::Loading(_) => LoadState::Loading,
            Phase::Loaded(_) => LoadState::Loaded,
            Phase::Failed(_) => LoadState::Failed,
        }
    }
}

/// Per-identifier loading state
struct ArtifactSlot {
    /// Current phase; never held across an await
    phase: Mutex<Phase>,

    /// Serialises filesystem work on the entry directory
    io_guard: Arc<tokio::sync::Mutex<()>>,

    /// Pending background write-back
    write_back: Mutex<Option<JoinHandle<()>>>,
}

impl ArtifactSlot {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Unloaded),
            io_guard: Arc::new(tokio::sync::Mutex::new(())),
            write_back: Mutex::new(None),
        }
    }
}

struct LoaderInner {
    /// Local cache tier
    local: LocalCacheStore,

    /// Remote cache tier, if configured
    remote: Option<RemoteBlobStore>,

    /// Origin tier
    origin: OriginFetcher,

    /// Slots by identifier
    slots: DashMap<ArtifactId, Arc<ArtifactSlot>>,

    /// Upload origin fetches in a background task instead of inline
    background_write_back: bool,
}

/// Loads models through the cache tiers, at most once per identifier
#[derive(Clone)]
pub struct ArtifactLoader {
    inner: Arc<LoaderInner>,
}

impl ArtifactLoader {
    /// Starts building a loader over the local tier and the origin
    pub fn builder(local: LocalCacheStore, origin: OriginFetcher) -> ArtifactLoaderBuilder {
        ArtifactLoaderBuilder {
            local,
            origin,
            remote: None,
            background_write_back: true,
        }
    }

    /// Local cache tier
    pub fn local(&self) -> &LocalCacheStore {
        &self.inner.local
    }

    /// Returns true if a remote tier is configured
    pub fn has_remote(&self) -> bool {
        self.inner.remote.is_some()
    }

    fn slot(&self, id: &ArtifactId) -> Arc<ArtifactSlot> {
        if let Some(slot) = self.inner.slots.get(id) {
            return slot.value().clone();
        }

        self.inner
            .slots
            .entry(id.clone())
            .or_insert_with(|| Arc::new(ArtifactSlot::new()))
            .value()
            .clone()
    }

    /// Ensures the model is in memory and returns its handle
    ///
    /// A loaded model is returned without any I/O. Otherwise the caller
    /// joins the in-flight load or starts a new one; a model that failed to
    /// load is retried.
    pub async fn ensure_loaded(&self, id: &ArtifactId) -> LoadResult {
        let slot = self.slot(id);

        let load = {
            let mut phase = slot.phase.lock();

            let pending = match &*phase {
                Phase::Loaded(artifact) => return Ok(artifact.clone()),
                Phase::Loading(load) => Some(load.clone()),
                Phase::Unloaded | Phase::Failed(_) => None,
            };

            match pending {
                Some(load) => {
                    debug!("Waiting for in-flight load of {}", id);
                    load
                }
                None => {
                    let load = self.spawn_load(id.clone(), slot.clone());
                    *phase = Phase::Loading(load.clone());
                    load
                }
            }
        };

        load.await
    }

    fn spawn_load(&self, id: ArtifactId, slot: Arc<ArtifactSlot>) -> SharedLoad {
        let inner = self.inner.clone();
        let task_slot = slot.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            info!("Loading model {}", id);

            let result = {
                let _guard = task_slot.io_guard.lock().await;
                inner.load_tiers(&id).await
            };

            match result {
                Ok(artifact) => {
                    let artifact = Arc::new(artifact);
                    info!(
                        "Model {} loaded from {} ({}) in {}",
                        id,
                        artifact.source,
                        format_bytes(artifact.total_bytes()),
                        format_duration(started.elapsed())
                    );
                    inner.publish(&task_slot, artifact.clone()).await;
                    Ok(artifact)
                }
                Err(e) => {
                    error!("Failed to load model {}: {}", id, e);
                    *task_slot.phase.lock() = Phase::Failed(e.clone());
                    Err(e)
                }
            }
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let err = Error::Internal(format!("load task failed: {}", e));
                    *slot.phase.lock() = Phase::Failed(err.clone());
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Current state of `id`
    pub fn status(&self, id: &ArtifactId) -> LoadState {
        match self.inner.slots.get(id) {
            Some(slot) => slot.phase.lock().state(),
            None => LoadState::Unloaded,
        }
    }

    /// Returns the handle of a loaded model without loading it
    pub fn artifact(&self, id: &ArtifactId) -> LoadResult {
        let slot = self
            .inner
            .slots
            .get(id)
            .map(|slot| slot.value().clone())
            .ok_or_else(|| Error::NotLoaded(format!("{} is unloaded", id)))?;

        let phase = slot.phase.lock();
        match &*phase {
            Phase::Loaded(artifact) => Ok(artifact.clone()),
            other => Err(Error::NotLoaded(format!("{} is {}", id, other.state()))),
        }
    }

    /// Waits for a pending background write-back of `id`, if any
    pub async fn wait_for_write_back(&self, id: &ArtifactId) {
        let slot = match self.inner.slots.get(id) {
            Some(slot) => slot.value().clone(),
            None => return,
        };

        let handle = slot.write_back.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Write-back task for {} failed: {}", id, e);
            }
        }
    }
}

impl LoaderInner {
    /// Walks the tiers: local, then remote, then origin
    async fn load_tiers(&self, id: &ArtifactId) -> Result<LoadedArtifact> {
        let key = CacheKeyResolver::resolve(id);

        if self.local.is_cached(&key).await {
            info!("Found model {} in local cache", id);
            return self.local.read_artifact(id).await;
        }

        if let Some(remote) = &self.remote {
            match self.load_from_remote(remote, id, &key).await {
                Ok(Some(artifact)) => return Ok(artifact),
                Ok(None) => debug!("Model {} not in remote cache", id),
                Err(e) => warn!("Remote cache unavailable for {}, falling back to origin: {}", id, e),
            }
        }

        info!("Model {} not cached, fetching from origin", id);
        self.origin.fetch(id, &key, &self.local.entry_path(&key)).await
    }

    async fn load_from_remote(
        &self,
        remote: &RemoteBlobStore,
        id: &ArtifactId,
        key: &CacheKey,
    ) -> Result<Option<LoadedArtifact>> {
        let prefix = CacheKeyResolver::remote_prefix(key);
        let count = remote.download_all(&prefix, &self.local.entry_path(key)).await?;
        if count == 0 {
            return Ok(None);
        }

        if !self.local.is_cached(key).await {
            warn!(
                "Remote entry {} has no {}, treating it as a miss",
                prefix,
                self.local.manifest_file()
            );
            return Ok(None);
        }

        info!("Restored model {} from remote cache {}", id, remote.location());
        let mut artifact = self.local.read_artifact(id).await?;
        artifact.source = ArtifactSource::Remote;
        Ok(Some(artifact))
    }

    /// Makes a loaded artifact visible and starts its write-back
    ///
    /// Only origin fetches are written back. A background write-back is
    /// registered before the slot turns `Loaded` so that
    /// `wait_for_write_back` never misses it.
    async fn publish(&self, slot: &ArtifactSlot, artifact: Arc<LoadedArtifact>) {
        let remote = match (&self.remote, artifact.source) {
            (Some(remote), ArtifactSource::Origin) => remote.clone(),
            _ => {
                *slot.phase.lock() = Phase::Loaded(artifact);
                return;
            }
        };

        if self.background_write_back {
            let guard = slot.io_guard.clone();
            let uploaded = artifact.clone();
            let handle = tokio::spawn(async move {
                let _guard = guard.lock().await;
                write_back(&remote, &uploaded).await;
            });
            *slot.write_back.lock() = Some(handle);
            *slot.phase.lock() = Phase::Loaded(artifact);
        } else {
            *slot.phase.lock() = Phase::Loaded(artifact.clone());
            let _guard = slot.io_guard.lock().await;
            write_back(&remote, &artifact).await;
        }
    }
}

/// Best-effort upload of an origin fetch to the remote tier
async fn write_back(remote: &RemoteBlobStore, artifact: &LoadedArtifact) {
    let prefix = CacheKeyResolver::remote_prefix(&artifact.key);

    match remote.upload_all(&artifact.root, &prefix).await {
        Ok(count) => info!("Wrote back {} files for {} to {}{}", count, artifact.id, remote.location(), prefix),
        Err(e) => warn!("Failed to write back model {} to remote cache: {}", artifact.id, e),
    }
}

/// Builder for [`ArtifactLoader`]
pub struct ArtifactLoaderBuilder {
    local: LocalCacheStore,
    origin: OriginFetcher,
    remote: Option<RemoteBlobStore>,
    background_write_back: bool,
}

impl ArtifactLoaderBuilder {
    /// Adds the remote tier if one is given
    pub fn maybe_remote(mut self, remote: Option<RemoteBlobStore>) -> Self {
        self.remote = remote;
        self
    }

    /// Chooses between background (default) and inline write-back
    pub fn background_write_back(mut self, enabled: bool) -> Self {
        self.background_write_back = enabled;
        self
    }

    /// Builds the loader
    pub fn build(self) -> ArtifactLoader {
        ArtifactLoader {
            inner: Arc::new(LoaderInner {
                local: self.local,
                remote: self.remote,
                origin: self.origin,
                slots: DashMap::new(),
                background_write_back: self.background_write_back,
            }),
        }
    }
}
