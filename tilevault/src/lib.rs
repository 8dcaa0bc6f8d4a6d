//! TileVault - a bounded, resumable offline map tile cache.
//!
//! Decides which slippy-map tiles cover a region across a zoom range,
//! downloads them with bounded concurrency, stores them durably and serves
//! them back cache-first.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tilevault::{BoundingBox, BulkCacheRequest, CacheConfig, HttpTileSource, JobObservers,
//!     LatLon, OfflineCache};
//!
//! let source = Arc::new(HttpTileSource::new("https://tile.openstreetmap.org/{z}/{x}/{y}.png")?);
//! let cache = OfflineCache::open(CacheConfig::new("/tmp/tiles"), Some(source)).await?;
//!
//! let region = BoundingBox::new(LatLon::new(37.7, -122.5), LatLon::new(37.8, -122.4))?;
//! println!("{} tiles", cache.tile_count_for_region(&region, 10, 14)?);
//!
//! let job = cache.begin_bulk_cache(
//!     BulkCacheRequest::new(region, 10, 14),
//!     JobObservers::new().on_progress(|done, total| println!("{}/{}", done, total)),
//! )?;
//! let report = job.wait().await;
//! ```

pub mod config;
pub mod coord;
pub mod error;
pub mod fetch;
pub mod job;
pub mod logging;
pub mod region;
pub mod service;
pub mod source;
pub mod store;

pub use config::CacheConfig;
pub use coord::{BoundingBox, LatLon, TileAddress};
pub use error::{CacheError, CacheResult};
pub use job::{BulkCacheJob, BulkCacheRequest, JobObservers, JobProgress, JobReport, JobState};
pub use service::OfflineCache;
pub use source::{FetchError, HttpTileSource, TileSource};
