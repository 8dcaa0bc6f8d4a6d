//! The offline cache facade.
//!
//! [`OfflineCache`] owns the tile store, the optional memory tier, the
//! persisted source record and the one bulk cache job allowed at a time.
//! Create it with [`OfflineCache::open`] at startup and call
//! [`OfflineCache::shutdown`] when done.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{whole_megabytes, CacheConfig};
use crate::coord::{BoundingBox, TileAddress};
use crate::error::{CacheError, CacheResult};
use crate::fetch::fetch_one;
use crate::job::{self, BulkCacheJob, BulkCacheRequest, JobContext, JobObservers};
use crate::region::{self, RegionPlan};
use crate::source::TileSource;
use crate::store::{MemoryTier, RemovalResult, SourceMetadata, SourceMetadataStore, TileStore};

/// Bounded, resumable offline tile cache.
pub struct OfflineCache {
    config: CacheConfig,
    store: TileStore,
    memory: Option<Arc<MemoryTier>>,
    metadata: SourceMetadataStore,
    source: Option<Arc<dyn TileSource>>,
    runtime: tokio::runtime::Handle,
    active_job: Mutex<Option<BulkCacheJob>>,
    next_job_id: AtomicU64,
    shutdown: CancellationToken,
}

impl OfflineCache {
    /// Opens the cache at `config.directory`.
    ///
    /// Without a `source` the cache is offline-only: [`fetch_tile`] serves
    /// stored tiles and bulk caching is unavailable.
    ///
    /// Must be called from within a Tokio runtime; jobs are spawned on it.
    ///
    /// [`fetch_tile`]: OfflineCache::fetch_tile
    pub async fn open(
        config: CacheConfig,
        source: Option<Arc<dyn TileSource>>,
    ) -> CacheResult<Self> {
        let store = TileStore::open(&config.directory).await?;
        let metadata = SourceMetadataStore::new(&config.directory);
        let memory = (config.memory_cache_bytes > 0)
            .then(|| Arc::new(MemoryTier::new(config.memory_cache_bytes)));

        info!(
            directory = %config.directory.display(),
            tiles = store.entry_count(),
            size_mb = whole_megabytes(store.total_size_bytes()),
            source = source.as_ref().map(|s| s.identity()).unwrap_or("none"),
            "Offline cache opened"
        );

        Ok(Self {
            config,
            store,
            memory,
            metadata,
            source,
            runtime: tokio::runtime::Handle::current(),
            active_job: Mutex::new(None),
            next_job_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub fn source(&self) -> Option<&Arc<dyn TileSource>> {
        self.source.as_ref()
    }

    /// Number of tiles a bulk cache of the region would cover.
    pub fn tile_count_for_region(
        &self,
        region: &BoundingBox,
        min_zoom: u8,
        max_zoom: u8,
    ) -> CacheResult<u64> {
        region::tile_count(region, min_zoom, max_zoom, self.config.max_zoom)
    }

    /// Returns a tile, cache first.
    ///
    /// Checks the memory tier, then the store, then fetches from the source
    /// and writes the result through to both.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotFound`] if the tile is not cached and there is no source
    /// - [`CacheError::FetchTransient`] / [`CacheError::FetchPermanent`] if the fetch fails
    /// - [`CacheError::WriteError`] if the fetched tile cannot be stored
    pub async fn fetch_tile(&self, address: TileAddress) -> CacheResult<Vec<u8>> {
        if let Some(memory) = &self.memory {
            if let Some(bytes) = memory.get(&address).await {
                return Ok(bytes.as_ref().clone());
            }
        }

        match self.store.get(&address).await {
            Ok(bytes) => {
                if let Some(memory) = &self.memory {
                    memory.put(address, Arc::new(bytes.clone())).await;
                }
                return Ok(bytes);
            }
            Err(CacheError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let Some(source) = &self.source else {
            return Err(CacheError::NotFound(address));
        };

        debug!(tile = %address, "Cache miss, fetching from source");
        let bytes = fetch_one(source.as_ref(), address, &self.config.retry, &self.shutdown)
            .await
            .map_err(|e| e.into_cache_error(address))?;

        self.store.put(address, bytes.clone()).await?;
        if let Some(memory) = &self.memory {
            memory.put(address, Arc::new(bytes.clone())).await;
        }
        Ok(bytes)
    }

    /// Starts downloading a region for offline use.
    ///
    /// Validation errors are returned immediately; the download itself runs
    /// in the background and reports through `observers` and the returned
    /// handle.
    ///
    /// # Errors
    ///
    /// - [`CacheError::JobAlreadyRunning`] if a job is pending or running
    /// - [`CacheError::NoSource`] if the cache was opened without a source
    /// - [`CacheError::InvalidRegion`] / [`CacheError::ZoomOutOfRange`] for a bad request
    pub fn begin_bulk_cache(
        &self,
        request: BulkCacheRequest,
        observers: JobObservers,
    ) -> CacheResult<BulkCacheJob> {
        let mut active = self.active_job.lock();
        if let Some(running) = active.as_ref().filter(|job| job.is_active()) {
            return Err(CacheError::JobAlreadyRunning(running.id()));
        }

        let source = self.source.clone().ok_or(CacheError::NoSource)?;
        let plan = RegionPlan::new(
            request.region,
            request.min_zoom,
            request.max_zoom,
            self.config.max_zoom,
        )?;

        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let job = BulkCacheJob::new(id, request, self.shutdown.child_token());
        let context = JobContext {
            store: self.store.clone(),
            metadata: self.metadata.clone(),
            source,
            memory: self.memory.clone(),
            concurrency: self.config.concurrency,
            retry: self.config.retry.clone(),
            max_cache_bytes: self.config.max_cache_bytes,
        };

        job::spawn(&self.runtime, job.clone(), plan, context, observers);
        *active = Some(job.clone());
        Ok(job)
    }

    /// Cancels the running job, if any. Returns whether one was cancelled.
    pub fn cancel_bulk_cache(&self) -> bool {
        match self.active_job() {
            Some(job) => {
                info!(job_id = job.id(), "Cancelling bulk cache job");
                job.cancel();
                true
            }
            None => false,
        }
    }

    /// The pending or running job, if any.
    pub fn active_job(&self) -> Option<BulkCacheJob> {
        self.active_job
            .lock()
            .as_ref()
            .filter(|job| job.is_active())
            .cloned()
    }

    /// Deletes every cached tile and forgets the saved source.
    ///
    /// A running job is cancelled and awaited first so none of its writes
    /// land after the clear.
    pub async fn clear_cache(&self) -> CacheResult<RemovalResult> {
        if let Some(job) = self.active_job() {
            job.cancel();
            job.wait().await;
        }

        let result = self.store.clear_all().await?;
        if let Some(memory) = &self.memory {
            memory.clear().await;
        }
        self.metadata.clear().await?;

        info!(
            entries_removed = result.entries_removed,
            bytes_freed = result.bytes_freed,
            "Offline cache cleared"
        );
        Ok(result)
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.store.total_size_bytes()
    }

    /// Total size in whole megabytes, rounded down.
    pub fn size_megabytes(&self) -> u64 {
        whole_megabytes(self.total_size_bytes())
    }

    /// The source recorded by the last completed bulk cache.
    pub async fn source_metadata(&self) -> CacheResult<Option<SourceMetadata>> {
        self.metadata.load().await
    }

    /// True when there is no usable offline data for the current source.
    ///
    /// That is the case when no bulk cache has completed since the last
    /// clear, or when the recorded source differs from the configured one.
    pub async fn requires_online_start(&self) -> bool {
        match self.metadata.load().await {
            Ok(Some(saved)) => self
                .source
                .as_ref()
                .is_some_and(|source| source.identity() != saved.identity),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "Could not read source metadata");
                true
            }
        }
    }

    /// Evicts the oldest tiles if the store exceeds the configured limit.
    pub async fn collect_garbage(&self) -> CacheResult<RemovalResult> {
        match self.config.max_cache_bytes {
            Some(limit) => self.store.evict_to(limit).await,
            None => Ok(RemovalResult::default()),
        }
    }

    /// Cancels any running job and waits for it to stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(job) = self.active_job() {
            let report = job.wait().await;
            debug!(job_id = report.id, state = %report.state, "Job stopped for shutdown");
        }
        info!("Offline cache shut down");
    }
}

impl Drop for OfflineCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::LatLon;
    use crate::fetch::RetryPolicy;
    use crate::job::JobState;
    use crate::source::mock::MockTileSource;
    use std::time::Duration;
    use tempfile::TempDir;

    fn sf_region() -> BoundingBox {
        BoundingBox::new(LatLon::new(37.7, -122.5), LatLon::new(37.8, -122.4)).unwrap()
    }

    fn config(temp_dir: &TempDir) -> CacheConfig {
        CacheConfig::new(temp_dir.path())
            .with_retry_policy(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    async fn open_with(temp_dir: &TempDir, source: Arc<MockTileSource>) -> OfflineCache {
        OfflineCache::open(config(temp_dir), Some(source)).await.unwrap()
    }

    #[tokio::test]
    async fn test_tile_count_for_region() {
        let temp_dir = TempDir::new().unwrap();
        let cache = OfflineCache::open(config(&temp_dir), None).await.unwrap();

        assert_eq!(cache.tile_count_for_region(&sf_region(), 13, 13).unwrap(), 12);
        assert!(matches!(
            cache.tile_count_for_region(&sf_region(), 13, 18),
            Err(CacheError::ZoomOutOfRange { requested: 18, max: 17 })
        ));
    }

    #[tokio::test]
    async fn test_fetch_tile_offline_miss_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let cache = OfflineCache::open(config(&temp_dir), None).await.unwrap();
        let address = TileAddress::new(3, 1, 2).unwrap();

        assert!(matches!(
            cache.fetch_tile(address).await,
            Err(CacheError::NotFound(a)) if a == address
        ));
    }

    #[tokio::test]
    async fn test_fetch_tile_writes_through() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockTileSource::new());
        let cache = open_with(&temp_dir, source.clone()).await;
        let address = TileAddress::new(3, 1, 2).unwrap();

        let first = cache.fetch_tile(address).await.unwrap();
        let second = cache.fetch_tile(address).await.unwrap();

        assert_eq!(first, MockTileSource::body_for(&address));
        assert_eq!(first, second);
        assert_eq!(source.call_count(), 1);
        assert!(cache.store().has(&address));
        assert_eq!(cache.total_size_bytes(), first.len() as u64);
    }

    #[tokio::test]
    async fn test_fetch_tile_failure_is_distinct_from_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let address = TileAddress::new(3, 1, 2).unwrap();
        let source = Arc::new(MockTileSource::new().failing_permanently(address));
        let cache = open_with(&temp_dir, source).await;

        assert!(matches!(
            cache.fetch_tile(address).await,
            Err(CacheError::FetchPermanent { .. })
        ));
        assert!(!cache.store().has(&address));
    }

    #[tokio::test]
    async fn test_begin_without_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let cache = OfflineCache::open(config(&temp_dir), None).await.unwrap();

        let result =
            cache.begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 13), JobObservers::new());
        assert!(matches!(result, Err(CacheError::NoSource)));
    }

    #[tokio::test]
    async fn test_begin_rejects_invalid_request() {
        let temp_dir = TempDir::new().unwrap();
        let cache = open_with(&temp_dir, Arc::new(MockTileSource::new())).await;

        let result =
            cache.begin_bulk_cache(BulkCacheRequest::new(sf_region(), 14, 13), JobObservers::new());
        assert!(matches!(result, Err(CacheError::InvalidRegion(_))));
        assert!(cache.active_job().is_none());
    }

    #[tokio::test]
    async fn test_bulk_cache_then_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockTileSource::new());
        let cache = open_with(&temp_dir, source.clone()).await;
        assert!(cache.requires_online_start().await);

        let job = cache
            .begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 13), JobObservers::new())
            .unwrap();
        let report = job.wait().await;

        assert_eq!(report.state, JobState::Completed);
        assert!(cache.active_job().is_none());
        assert!(!cache.requires_online_start().await);
        let saved = cache.source_metadata().await.unwrap().unwrap();
        assert_eq!(saved.identity, source.identity());
    }

    #[tokio::test]
    async fn test_clear_cache_resets_everything() {
        let temp_dir = TempDir::new().unwrap();
        let cache = open_with(&temp_dir, Arc::new(MockTileSource::new())).await;

        cache
            .begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 13), JobObservers::new())
            .unwrap()
            .wait()
            .await;
        let address = TileAddress::new(13, 1308, 3165).unwrap();
        cache.fetch_tile(address).await.unwrap();
        assert!(cache.total_size_bytes() > 0);

        let result = cache.clear_cache().await.unwrap();

        assert_eq!(result.entries_removed, 12);
        assert_eq!(cache.total_size_bytes(), 0);
        assert_eq!(cache.size_megabytes(), 0);
        assert!(cache.source_metadata().await.unwrap().is_none());
        assert!(cache.requires_online_start().await);
        assert!(!cache.store().has(&address));
    }

    #[tokio::test]
    async fn test_clear_cache_cancels_running_job() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockTileSource::new().with_delay(Duration::from_millis(20)));
        let cache = open_with(&temp_dir, source).await;

        let job = cache
            .begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 15), JobObservers::new())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache.clear_cache().await.unwrap();

        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(cache.total_size_bytes(), 0);
        assert_eq!(cache.store().entry_count(), 0);
    }

    #[tokio::test]
    async fn test_collect_garbage_without_limit_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let cache = open_with(&temp_dir, Arc::new(MockTileSource::new())).await;
        cache.fetch_tile(TileAddress::new(2, 1, 1).unwrap()).await.unwrap();

        let result = cache.collect_garbage().await.unwrap();
        assert_eq!(result.entries_removed, 0);
        assert_eq!(cache.store().entry_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_running_job() {
        let temp_dir = TempDir::new().unwrap();
        let source = Arc::new(MockTileSource::new().with_delay(Duration::from_millis(20)));
        let cache = open_with(&temp_dir, source).await;

        let job = cache
            .begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 15), JobObservers::new())
            .unwrap();
        cache.shutdown().await;

        assert_eq!(job.state(), JobState::Cancelled);
        assert!(cache.active_job().is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_mid_job_fails_and_frees_slot() {
        let temp_dir = TempDir::new().unwrap();
        let cache = open_with(&temp_dir, Arc::new(MockTileSource::new())).await;
        let tiles = cache.store().root().join("tiles");

        let completions = Arc::new(AtomicU64::new(0));
        let observers = {
            let completions = Arc::clone(&completions);
            JobObservers::new()
                .on_progress(move |completed, _total| {
                    if completed == 3 {
                        // Later puts cannot create their column directories
                        std::fs::remove_dir_all(&tiles).unwrap();
                        std::fs::write(&tiles, b"not a directory").unwrap();
                    }
                })
                .on_complete(move |_report| {
                    completions.fetch_add(1, Ordering::SeqCst);
                })
        };

        let job = cache
            .begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 13), observers)
            .unwrap();
        let report = job.wait().await;

        assert_eq!(report.state, JobState::Failed);
        assert!(report.error.is_some());
        assert!(report.completed_tiles() < 12);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert!(cache.active_job().is_none());
        assert!(cache.source_metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_wedge_cache() {
        let temp_dir = TempDir::new().unwrap();
        let cache = open_with(&temp_dir, Arc::new(MockTileSource::new())).await;

        let observers = JobObservers::new().on_progress(|completed, _total| {
            if completed == 3 {
                panic!("progress observer failed");
            }
        });
        let job = cache
            .begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 13), observers)
            .unwrap();
        let report = tokio::time::timeout(Duration::from_secs(5), job.wait())
            .await
            .unwrap();
        assert_eq!(report.state, JobState::Failed);
        assert!(cache.active_job().is_none());

        let retry = cache
            .begin_bulk_cache(BulkCacheRequest::new(sf_region(), 13, 13), JobObservers::new())
            .unwrap();
        assert_eq!(retry.wait().await.state, JobState::Completed);

        tokio::time::timeout(Duration::from_secs(5), cache.clear_cache())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_force_refresh_replaces_memory_tier_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let cache = open_with(&temp_dir, Arc::new(MockTileSource::new())).await;
        let address = TileAddress::new(13, 1308, 3165).unwrap();

        cache.store().put(address, vec![9, 9, 9]).await.unwrap();
        assert_eq!(cache.fetch_tile(address).await.unwrap(), vec![9, 9, 9]);

        let request = BulkCacheRequest::new(sf_region(), 13, 13).with_force_refresh(true);
        let report = cache
            .begin_bulk_cache(request, JobObservers::new())
            .unwrap()
            .wait()
            .await;
        assert_eq!(report.state, JobState::Completed);

        assert_eq!(
            cache.fetch_tile(address).await.unwrap(),
            MockTileSource::body_for(&address)
        );
    }
}
