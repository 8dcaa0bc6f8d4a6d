//! In-memory hot tier using moka.
//!
//! Sits in front of the [`TileStore`](super::TileStore) for repeated
//! single-tile reads. Entries are weighted by blob size and evicted LRU once
//! the configured byte budget is exceeded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;

use crate::coord::TileAddress;

/// Size-bounded in-memory tile cache.
pub struct MemoryTier {
    cache: Cache<TileAddress, Arc<Vec<u8>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryTier {
    /// Create a new memory tier with the given size limit.
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            // moka uses u32 for weights, cap at u32::MAX for very large entries
            .weigher(|_key: &TileAddress, value: &Arc<Vec<u8>>| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, address: &TileAddress) -> Option<Arc<Vec<u8>>> {
        match self.cache.get(address).await {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, address: TileAddress, data: Arc<Vec<u8>>) {
        self.cache.insert(address, data).await;
    }

    pub async fn remove(&self, address: &TileAddress) {
        self.cache.invalidate(address).await;
    }

    /// Drop every entry and wait for the invalidation to complete.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    pub async fn size_bytes(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.weighted_size()
    }

    /// Returns `(hits, misses)` since creation.
    pub fn hit_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
