//! Bulk cache jobs.
//!
//! A [`BulkCacheJob`] downloads every tile of a region across a zoom range
//! into the [`TileStore`]. It runs as one spawned task that consumes the
//! fetch stream, so counters only move forward and progress callbacks are
//! serialized.
//!
//! Tiles already in the store are skipped (and credited as completed) unless
//! the request sets `force_refresh`. Per-tile fetch failures are counted but
//! never stop the job; a storage fault or a panicking observer fails it.

mod state;

pub use state::{JobProgress, JobReport, JobState};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coord::BoundingBox;
use crate::error::CacheResult;
use crate::fetch::{fetch_many, RetryPolicy};
use crate::region::RegionPlan;
use crate::source::TileSource;
use crate::store::{MemoryTier, SourceMetadataStore, TileStore};

/// Identifier of a bulk cache job, unique within one cache instance.
pub type JobId = u64;

/// Progress observer, called with `(completed_tiles, total_tiles)` once per
/// tile result.
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Completion observer, called exactly once when the job reaches a
/// terminal state.
pub type CompletionCallback = Box<dyn FnOnce(&JobReport) + Send>;

/// A request to cache a region for offline use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BulkCacheRequest {
    pub region: BoundingBox,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Re-download tiles that are already cached.
    pub force_refresh: bool,
}

impl BulkCacheRequest {
    pub fn new(region: BoundingBox, min_zoom: u8, max_zoom: u8) -> Self {
        Self {
            region,
            min_zoom,
            max_zoom,
            force_refresh: false,
        }
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }
}

/// Observers registered for one job. Each concern is registered separately.
#[derive(Default)]
pub struct JobObservers {
    on_progress: Option<ProgressCallback>,
    on_complete: Option<CompletionCallback>,
}

impl JobObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(callback));
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&JobReport) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

/// Everything the job runner needs from the cache.
pub(crate) struct JobContext {
    pub store: TileStore,
    pub metadata: SourceMetadataStore,
    pub source: Arc<dyn TileSource>,
    /// Invalidated on every write so reads never see replaced bytes.
    pub memory: Option<Arc<MemoryTier>>,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub max_cache_bytes: Option<u64>,
}

struct JobShared {
    id: JobId,
    request: BulkCacheRequest,
    created: Instant,
    state: Mutex<JobState>,
    error: Mutex<Option<String>>,
    total: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    cancel: CancellationToken,
    finished: watch::Sender<Option<JobReport>>,
}

/// Handle to a bulk cache job.
///
/// Cloning the handle shares the same job.
#[derive(Clone)]
pub struct BulkCacheJob {
    shared: Arc<JobShared>,
}

impl BulkCacheJob {
    pub(crate) fn new(id: JobId, request: BulkCacheRequest, cancel: CancellationToken) -> Self {
        let (finished, _) = watch::channel(None);
        Self {
            shared: Arc::new(JobShared {
                id,
                request,
                created: Instant::now(),
                state: Mutex::new(JobState::Pending),
                error: Mutex::new(None),
                total: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                cancel,
                finished,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn request(&self) -> &BulkCacheRequest {
        &self.shared.request
    }

    pub fn region(&self) -> &BoundingBox {
        &self.shared.request.region
    }

    pub fn state(&self) -> JobState {
        *self.shared.state.lock()
    }

    /// True until the job reaches a terminal state.
    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            total_tiles: self.shared.total.load(Ordering::SeqCst),
            completed_tiles: self.shared.completed.load(Ordering::SeqCst),
            failed_tiles: self.shared.failed.load(Ordering::SeqCst),
            skipped_tiles: self.shared.skipped.load(Ordering::SeqCst),
        }
    }

    pub fn total_tiles(&self) -> u64 {
        self.shared.total.load(Ordering::SeqCst)
    }

    pub fn completed_tiles(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub fn failed_tiles(&self) -> u64 {
        self.shared.failed.load(Ordering::SeqCst)
    }

    /// Requests cancellation. In-flight fetches finish and are kept.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Snapshot of the job as a report.
    pub fn report(&self) -> JobReport {
        if let Some(report) = self.shared.finished.borrow().clone() {
            return report;
        }
        JobReport {
            id: self.shared.id,
            state: self.state(),
            progress: self.progress(),
            elapsed: self.shared.created.elapsed(),
            error: self.shared.error.lock().clone(),
        }
    }

    /// Waits until the job has finished and its completion observer has run.
    pub async fn wait(&self) -> JobReport {
        let mut rx = self.shared.finished.subscribe();
        loop {
            if let Some(report) = rx.borrow_and_update().clone() {
                return report;
            }
            if rx.changed().await.is_err() {
                return self.report();
            }
        }
    }

    fn set_state(&self, state: JobState) {
        *self.shared.state.lock() = state;
    }

    fn finish(&self, state: JobState, elapsed: Duration) -> JobReport {
        self.set_state(state);
        JobReport {
            id: self.shared.id,
            state,
            progress: self.progress(),
            elapsed,
            error: self.shared.error.lock().clone(),
        }
    }
}

impl std::fmt::Debug for BulkCacheJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCacheJob")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .finish()
    }
}

/// Spawns the job runner on `runtime`.
pub(crate) fn spawn(
    runtime: &tokio::runtime::Handle,
    job: BulkCacheJob,
    plan: RegionPlan,
    context: JobContext,
    observers: JobObservers,
) {
    runtime.spawn(run(job, plan, context, observers));
}

async fn run(job: BulkCacheJob, plan: RegionPlan, context: JobContext, observers: JobObservers) {
    let started = Instant::now();
    let JobObservers {
        on_progress,
        on_complete,
    } = observers;

    let outcome = AssertUnwindSafe(execute(&job, plan, &context, on_progress.as_deref()))
        .catch_unwind()
        .await;
    let state = match outcome {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => {
            warn!(job_id = job.id(), error = %e, "Bulk cache job failed");
            *job.shared.error.lock() = Some(e.to_string());
            JobState::Failed
        }
        Err(payload) => {
            let message = format!("job panicked: {}", panic_message(payload.as_ref()));
            warn!(job_id = job.id(), error = %message, "Bulk cache job failed");
            *job.shared.error.lock() = Some(message);
            JobState::Failed
        }
    };

    let report = job.finish(state, started.elapsed());
    info!(
        job_id = report.id,
        state = %report.state,
        total = report.total_tiles(),
        completed = report.completed_tiles(),
        failed = report.failed_tiles(),
        skipped = report.skipped_tiles(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Bulk cache job finished"
    );

    if let Some(callback) = on_complete {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&report))) {
            warn!(
                job_id = report.id,
                error = %panic_message(payload.as_ref()),
                "Completion observer panicked"
            );
        }
    }
    job.shared.finished.send_replace(Some(report));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

async fn execute(
    job: &BulkCacheJob,
    plan: RegionPlan,
    context: &JobContext,
    on_progress: Option<&(dyn Fn(u64, u64) + Send + Sync)>,
) -> CacheResult<JobState> {
    job.set_state(JobState::Running);
    context.store.check_writable().await?;

    let total = plan.tile_count();
    job.shared.total.store(total, Ordering::SeqCst);

    info!(
        job_id = job.id(),
        region = %plan.region(),
        min_zoom = job.request().min_zoom,
        max_zoom = job.request().max_zoom,
        total,
        force_refresh = job.request().force_refresh,
        "Bulk cache job started"
    );

    // Cached tiles are credited as they are passed over
    let pending = {
        let store = context.store.clone();
        let shared = Arc::clone(&job.shared);
        let force_refresh = job.request().force_refresh;
        plan.into_tiles().filter(move |address| {
            if force_refresh || !store.has(address) {
                return true;
            }
            shared.skipped.fetch_add(1, Ordering::SeqCst);
            shared.completed.fetch_add(1, Ordering::SeqCst);
            false
        })
    };

    let mut results = pin!(fetch_many(
        pending,
        Arc::clone(&context.source),
        context.concurrency,
        context.retry.clone(),
        job.shared.cancel.clone(),
    ));

    while let Some((address, result)) = results.next().await {
        match result {
            Ok(bytes) => {
                context.store.put(address, bytes).await?;
                if let Some(memory) = &context.memory {
                    memory.remove(&address).await;
                }
            }
            Err(e) => {
                job.shared.failed.fetch_add(1, Ordering::SeqCst);
                debug!(job_id = job.id(), tile = %address, error = %e, "Tile fetch failed");
            }
        }

        let completed = job.shared.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(callback) = on_progress {
            callback(completed, total);
        }
    }

    // A cancel that lands after every tile was handled does not undo the job
    if job.completed_tiles() < total && job.is_cancel_requested() {
        return Ok(JobState::Cancelled);
    }

    context
        .metadata
        .save(context.source.identity())
        .await?;

    if let Some(limit) = context.max_cache_bytes {
        context.store.evict_to(limit).await?;
    }

    Ok(JobState::Completed)
}
