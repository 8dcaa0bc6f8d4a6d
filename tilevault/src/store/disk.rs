//! Durable on-disk tile store.
//!
//! Tiles are stored one file per address:
//!
//! ```text
//! {root}/tiles/{zoom}/{column}/{row}.tile
//! {root}/tmp/                 # in-progress writes
//! ```
//!
//! An in-memory index (address → size, stored_at) answers `has()` and keeps
//! the running byte total, so size queries never scan the disk. The index is
//! rebuilt from the directory tree when the store is opened.
//!
//! # Consistency
//!
//! Writes land in `tmp/` first and are renamed into place while holding the
//! index write lock, so the index and the tile tree change together and a
//! reader never observes a partially written blob. `clear_all()` renames the
//! whole tile tree aside under the same lock, making the clear atomic for
//! readers: they see either every pre-clear tile or none of them.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::coord::TileAddress;
use crate::error::{CacheError, CacheResult};

const TILES_DIR: &str = "tiles";
const TMP_DIR: &str = "tmp";
const TRASH_PREFIX: &str = "trash-";
const TILE_EXTENSION: &str = "tile";

/// Target percentage of limit after eviction (0.9 = 90%).
const EVICTION_TARGET_PERCENTAGE: f64 = 0.9;

/// A stored tile together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRecord {
    pub address: TileAddress,
    pub bytes: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

/// Result of a clear or eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalResult {
    /// Number of tiles removed.
    pub entries_removed: usize,
    /// Total bytes freed.
    pub bytes_freed: u64,
    /// Duration of the pass in milliseconds.
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    stored_at: SystemTime,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<TileAddress, IndexEntry>,
    total_bytes: u64,
}

impl Index {
    fn insert(&mut self, address: TileAddress, entry: IndexEntry) {
        if let Some(previous) = self.entries.insert(address, entry) {
            self.total_bytes -= previous.size;
        }
        self.total_bytes += entry.size;
    }

    fn remove(&mut self, address: &TileAddress) -> Option<IndexEntry> {
        let removed = self.entries.remove(address)?;
        self.total_bytes -= removed.size;
        Some(removed)
    }
}

struct StoreInner {
    root: PathBuf,
    index: RwLock<Index>,
    temp_counter: AtomicU64,
}

/// Durable key/value store from tile address to blob bytes.
///
/// Cheap to clone; clones share the same index and directory.
#[derive(Clone)]
pub struct TileStore {
    inner: Arc<StoreInner>,
}

impl TileStore {
    /// Opens (or creates) a tile store rooted at `root`.
    ///
    /// Scans existing tiles to rebuild the index and discards leftovers from
    /// interrupted writes or clears.
    pub async fn open(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        let scan_root = root.clone();

        let index = tokio::task::spawn_blocking(move || Self::open_blocking(&scan_root))
            .await
            .map_err(|e| CacheError::WriteError(io::Error::other(e.to_string())))?
            .map_err(CacheError::WriteError)?;

        info!(
            root = %root.display(),
            tiles = index.entries.len(),
            bytes = index.total_bytes,
            "Tile store opened"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                index: RwLock::new(index),
                temp_counter: AtomicU64::new(0),
            }),
        })
    }

    fn open_blocking(root: &Path) -> io::Result<Index> {
        std::fs::create_dir_all(root.join(TILES_DIR))?;

        // Nothing in tmp/ or a trash dir survives a restart
        let tmp = root.join(TMP_DIR);
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp)?;
        }
        std::fs::create_dir_all(&tmp)?;
        for entry in std::fs::read_dir(root)?.flatten() {
            if entry.file_name().to_string_lossy().starts_with(TRASH_PREFIX) {
                let _ = std::fs::remove_dir_all(entry.path());
            }
        }

        let mut index = Index::default();
        for (address, entry) in scan_tiles(&root.join(TILES_DIR)) {
            index.insert(address, entry);
        }
        Ok(index)
    }

    /// Returns the store's root directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn tile_path(root: &Path, address: &TileAddress) -> PathBuf {
        root.join(TILES_DIR)
            .join(address.zoom().to_string())
            .join(address.column().to_string())
            .join(format!("{}.{}", address.row(), TILE_EXTENSION))
    }

    /// Returns true if a tile is stored at `address`.
    pub fn has(&self, address: &TileAddress) -> bool {
        self.inner.index.read().entries.contains_key(address)
    }

    /// Sum of all stored blob sizes.
    pub fn total_size_bytes(&self) -> u64 {
        self.inner.index.read().total_bytes
    }

    /// Number of stored tiles.
    pub fn entry_count(&self) -> usize {
        self.inner.index.read().entries.len()
    }

    /// Reads the bytes stored at `address`.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if no tile is stored there (including when a
    /// concurrent clear removed it).
    pub async fn get(&self, address: &TileAddress) -> CacheResult<Vec<u8>> {
        Ok(self.record(address).await?.bytes)
    }

    /// Reads the full record stored at `address`.
    pub async fn record(&self, address: &TileAddress) -> CacheResult<TileRecord> {
        let stored_at = match self.inner.index.read().entries.get(address) {
            Some(entry) => entry.stored_at,
            None => return Err(CacheError::NotFound(*address)),
        };

        let path = Self::tile_path(&self.inner.root, address);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(TileRecord {
                address: *address,
                bytes,
                stored_at: stored_at.into(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CacheError::NotFound(*address)),
            Err(e) => Err(CacheError::ReadError(e)),
        }
    }

    /// Stores `bytes` at `address`, replacing any existing tile.
    ///
    /// Concurrent writers to the same address resolve last-write-wins.
    pub async fn put(&self, address: TileAddress, bytes: Vec<u8>) -> CacheResult<()> {
        let inner = Arc::clone(&self.inner);
        let size = bytes.len();

        tokio::task::spawn_blocking(move || inner.put_blocking(address, &bytes))
            .await
            .map_err(|e| CacheError::WriteError(io::Error::other(e.to_string())))?
            .map_err(CacheError::WriteError)?;

        debug!(tile = %address, bytes = size, "Tile stored");
        Ok(())
    }

    /// Removes the tile at `address`. Returns whether it existed.
    pub async fn delete(&self, address: &TileAddress) -> CacheResult<bool> {
        let inner = Arc::clone(&self.inner);
        let address = *address;

        tokio::task::spawn_blocking(move || {
            let mut index = inner.index.write();
            if index.remove(&address).is_none() {
                return Ok(false);
            }
            match std::fs::remove_file(Self::tile_path(&inner.root, &address)) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| CacheError::WriteError(io::Error::other(e.to_string())))?
        .map_err(CacheError::WriteError)
    }

    /// Deletes every tile and resets the size to zero.
    pub async fn clear_all(&self) -> CacheResult<RemovalResult> {
        let inner = Arc::clone(&self.inner);

        let result = tokio::task::spawn_blocking(move || inner.clear_blocking())
            .await
            .map_err(|e| CacheError::WriteError(io::Error::other(e.to_string())))?
            .map_err(CacheError::WriteError)?;

        info!(
            entries_removed = result.entries_removed,
            bytes_freed = result.bytes_freed,
            duration_ms = result.duration_ms,
            "Tile store cleared"
        );
        Ok(result)
    }

    /// Evicts the oldest tiles until the store fits within `max_bytes`.
    ///
    /// Does nothing while under the limit; once over, removes tiles by
    /// ascending `stored_at` down to 90% of the limit.
    pub async fn evict_to(&self, max_bytes: u64) -> CacheResult<RemovalResult> {
        let inner = Arc::clone(&self.inner);

        let result = tokio::task::spawn_blocking(move || inner.evict_blocking(max_bytes))
            .await
            .map_err(|e| CacheError::WriteError(io::Error::other(e.to_string())))?;

        if result.entries_removed > 0 {
            info!(
                entries_removed = result.entries_removed,
                bytes_freed = result.bytes_freed,
                duration_ms = result.duration_ms,
                "Tile store eviction complete"
            );
        }
        Ok(result)
    }

    /// Verifies the store can accept writes.
    pub async fn check_writable(&self) -> CacheResult<()> {
        let probe = self
            .inner
            .root
            .join(TMP_DIR)
            .join(format!("probe-{}", self.inner.next_temp_id()));

        tokio::fs::create_dir_all(self.inner.root.join(TILES_DIR))
            .await
            .map_err(CacheError::WriteError)?;
        tokio::fs::create_dir_all(self.inner.root.join(TMP_DIR))
            .await
            .map_err(CacheError::WriteError)?;
        tokio::fs::write(&probe, b"probe")
            .await
            .map_err(CacheError::WriteError)?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(CacheError::WriteError)
    }

    /// Sums blob sizes by scanning the disk.
    ///
    /// Used to verify that incremental accounting matches reality.
    pub async fn reconcile(&self) -> CacheResult<u64> {
        let tiles = self.inner.root.join(TILES_DIR);
        tokio::task::spawn_blocking(move || {
            scan_tiles(&tiles)
                .into_iter()
                .map(|(_, entry)| entry.size)
                .sum::<u64>()
        })
        .await
        .map_err(|e| CacheError::ReadError(io::Error::other(e.to_string())))
    }
}

impl StoreInner {
    fn next_temp_id(&self) -> u64 {
        self.temp_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn put_blocking(&self, address: TileAddress, bytes: &[u8]) -> io::Result<()> {
        let temp_path = self.root.join(TMP_DIR).join(format!(
            "{}-{}-{}-{}.part",
            self.next_temp_id(),
            address.zoom(),
            address.column(),
            address.row()
        ));
        std::fs::create_dir_all(self.root.join(TMP_DIR))?;
        std::fs::write(&temp_path, bytes)?;

        let path = TileStore::tile_path(&self.root, &address);
        let mut index = self.index.write();
        let placed = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::rename(&temp_path, &path));
        if let Err(e) = placed {
            drop(index);
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        index.insert(
            address,
            IndexEntry {
                size: bytes.len() as u64,
                stored_at: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn clear_blocking(&self) -> io::Result<RemovalResult> {
        let start = Instant::now();
        let tiles = self.root.join(TILES_DIR);
        let trash = self
            .root
            .join(format!("{}{}", TRASH_PREFIX, self.next_temp_id()));

        let removed = {
            let mut index = self.index.write();
            if tiles.exists() {
                std::fs::rename(&tiles, &trash)?;
            }
            std::fs::create_dir_all(&tiles)?;
            std::mem::take(&mut *index)
        };

        if trash.exists() {
            if let Err(e) = std::fs::remove_dir_all(&trash) {
                // Removed on next open
                warn!(path = %trash.display(), error = %e, "Failed to remove cleared tiles");
            }
        }

        Ok(RemovalResult {
            entries_removed: removed.entries.len(),
            bytes_freed: removed.total_bytes,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn evict_blocking(&self, max_bytes: u64) -> RemovalResult {
        let start = Instant::now();

        let (mut candidates, total) = {
            let index = self.index.read();
            if index.total_bytes <= max_bytes {
                return RemovalResult::default();
            }
            let candidates: Vec<(TileAddress, IndexEntry)> =
                index.entries.iter().map(|(a, e)| (*a, *e)).collect();
            (candidates, index.total_bytes)
        };

        let target_size = (max_bytes as f64 * EVICTION_TARGET_PERCENTAGE) as u64;
        info!(
            current_size = total,
            limit = max_bytes,
            target = target_size,
            "Tile store over limit, starting eviction"
        );

        // Oldest first
        candidates.sort_by_key(|(_, entry)| entry.stored_at);

        let mut result = RemovalResult::default();
        for (address, candidate) in candidates {
            let mut index = self.index.write();
            if index.total_bytes <= target_size {
                break;
            }
            // Skip tiles rewritten since the candidate list was taken
            match index.entries.get(&address) {
                Some(current) if current.stored_at == candidate.stored_at => {}
                _ => continue,
            }
            match std::fs::remove_file(TileStore::tile_path(&self.root, &address)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    debug!(tile = %address, error = %e, "Failed to evict tile");
                    continue;
                }
            }
            if let Some(entry) = index.remove(&address) {
                result.entries_removed += 1;
                result.bytes_freed += entry.size;
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }
}

/// Walks `{tiles}/{zoom}/{column}/{row}.tile`, skipping anything that does
/// not parse as a valid address.
fn scan_tiles(tiles: &Path) -> Vec<(TileAddress, IndexEntry)> {
    let mut found = Vec::new();

    for (zoom_dir, zoom) in numeric_entries::<u8>(tiles) {
        for (column_dir, column) in numeric_entries::<u32>(&zoom_dir) {
            let Ok(files) = std::fs::read_dir(&column_dir) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some(TILE_EXTENSION) {
                    continue;
                }
                let Some(row) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<u32>().ok())
                else {
                    continue;
                };
                let Ok(address) = TileAddress::new(zoom, column, row) else {
                    continue;
                };
                let Ok(metadata) = file.metadata() else {
                    continue;
                };
                found.push((
                    address,
                    IndexEntry {
                        size: metadata.len(),
                        stored_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    },
                ));
            }
        }
    }

    found
}

fn numeric_entries<T: std::str::FromStr>(dir: &Path) -> Vec<(PathBuf, T)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let value = e.file_name().to_str()?.parse::<T>().ok()?;
            Some((e.path(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn addr(zoom: u8, column: u32, row: u32) -> TileAddress {
        TileAddress::new(zoom, column, row).unwrap()
    }

    async fn create_test_store() -> (TempDir, TileStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = TileStore::open(temp_dir.path()).await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_put_then_get_returns_same_bytes() {
        let (_temp_dir, store) = create_test_store().await;
        let tile = addr(13, 1308, 3165);

        store.put(tile, vec![1, 2, 3, 4]).await.unwrap();

        assert!(store.has(&tile));
        assert_eq!(store.get(&tile).await.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_temp_dir, store) = create_test_store().await;
        let result = store.get(&addr(5, 1, 1)).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_size_tracks_puts_overwrites_and_deletes() {
        let (_temp_dir, store) = create_test_store().await;

        store.put(addr(10, 1, 1), vec![0; 100]).await.unwrap();
        store.put(addr(10, 1, 2), vec![0; 250]).await.unwrap();
        store.put(addr(10, 2, 1), vec![0; 50]).await.unwrap();
        assert_eq!(store.total_size_bytes(), 400);

        // Overwrite replaces the old size
        store.put(addr(10, 1, 1), vec![0; 10]).await.unwrap();
        assert_eq!(store.total_size_bytes(), 310);
        assert_eq!(store.entry_count(), 3);

        assert!(store.delete(&addr(10, 1, 2)).await.unwrap());
        assert!(!store.delete(&addr(10, 1, 2)).await.unwrap());
        assert_eq!(store.total_size_bytes(), 60);

        assert_eq!(store.reconcile().await.unwrap(), store.total_size_bytes());
    }

    #[tokio::test]
    async fn test_overwrite_updates_stored_at() {
        let (_temp_dir, store) = create_test_store().await;
        let tile = addr(8, 3, 4);

        store.put(tile, vec![1]).await.unwrap();
        let first = store.record(&tile).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.put(tile, vec![2, 2]).await.unwrap();
        let second = store.record(&tile).await.unwrap();

        assert_eq!(second.bytes, vec![2, 2]);
        assert!(second.stored_at > first.stored_at);
    }

    #[tokio::test]
    async fn test_clear_all_resets_size_and_removes_tiles() {
        let (_temp_dir, store) = create_test_store().await;
        for col in 0..8 {
            store.put(addr(4, col, 3), vec![7; 32]).await.unwrap();
        }

        let result = store.clear_all().await.unwrap();

        assert_eq!(result.entries_removed, 8);
        assert_eq!(result.bytes_freed, 256);
        assert_eq!(store.total_size_bytes(), 0);
        assert_eq!(store.entry_count(), 0);
        assert!(!store.has(&addr(4, 0, 3)));
        assert_eq!(store.reconcile().await.unwrap(), 0);

        // Store stays usable after a clear
        store.put(addr(4, 0, 3), vec![1]).await.unwrap();
        assert_eq!(store.total_size_bytes(), 1);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = TileStore::open(temp_dir.path()).await.unwrap();
            store.put(addr(12, 100, 200), vec![0; 64]).await.unwrap();
            store.put(addr(12, 101, 200), vec![0; 36]).await.unwrap();
        }

        let reopened = TileStore::open(temp_dir.path()).await.unwrap();
        assert!(reopened.has(&addr(12, 100, 200)));
        assert!(reopened.has(&addr(12, 101, 200)));
        assert_eq!(reopened.total_size_bytes(), 100);
        assert_eq!(reopened.get(&addr(12, 101, 200)).await.unwrap().len(), 36);
    }

    #[tokio::test]
    async fn test_scan_ignores_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let stray = temp_dir.path().join("tiles").join("3").join("9");
        std::fs::create_dir_all(&stray).unwrap();
        // Column 9 is outside the zoom 3 grid
        std::fs::write(stray.join("1.tile"), b"x").unwrap();
        std::fs::write(temp_dir.path().join("tiles").join("notes.txt"), b"x").unwrap();

        let store = TileStore::open(temp_dir.path()).await.unwrap();
        assert_eq!(store.entry_count(), 0);
        assert_eq!(store.total_size_bytes(), 0);
    }

    #[tokio::test]
    async fn test_evict_removes_oldest_first() {
        let (_temp_dir, store) = create_test_store().await;
        for row in 0..10 {
            store.put(addr(6, 0, row), vec![0; 100]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(store.total_size_bytes(), 1000);

        // Limit 500 → target 450 → keep the 4 newest
        let result = store.evict_to(500).await.unwrap();

        assert_eq!(result.entries_removed, 6);
        assert_eq!(result.bytes_freed, 600);
        assert_eq!(store.total_size_bytes(), 400);
        assert!(!store.has(&addr(6, 0, 0)));
        assert!(store.has(&addr(6, 0, 9)));
        assert_eq!(store.reconcile().await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_evict_under_limit_is_noop() {
        let (_temp_dir, store) = create_test_store().await;
        store.put(addr(6, 0, 0), vec![0; 100]).await.unwrap();

        let result = store.evict_to(1000).await.unwrap();
        assert_eq!(result, RemovalResult::default());
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_puts_keep_accounting_consistent() {
        let (_temp_dir, store) = create_test_store().await;

        let handles: Vec<_> = (0..32u32)
            .map(|i| {
                let store = store.clone();
                // Half the writers collide on the same addresses
                let tile = addr(9, i % 16, 7);
                tokio::spawn(async move { store.put(tile, vec![0; 10 + i as usize]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.entry_count(), 16);
        assert_eq!(store.reconcile().await.unwrap(), store.total_size_bytes());
    }

    #[tokio::test]
    async fn test_check_writable_on_healthy_store() {
        let (_temp_dir, store) = create_test_store().await;
        assert!(store.check_writable().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_clear_all_is_atomic_for_concurrent_readers() {
        use std::sync::atomic::AtomicBool;

        let (_temp_dir, store) = create_test_store().await;
        let tiles: Vec<TileAddress> = (0..64).map(|col| addr(8, col, 5)).collect();
        for tile in &tiles {
            store.put(*tile, vec![tile.column() as u8; 128]).await.unwrap();
        }
        let full_size = store.total_size_bytes();
        assert_eq!(full_size, 64 * 128);

        let cleared = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let tiles = tiles.clone();
                let cleared = Arc::clone(&cleared);
                tokio::spawn(async move {
                    let mut rounds = 0;
                    while rounds < 20 || !cleared.load(Ordering::SeqCst) {
                        let size = store.total_size_bytes();
                        assert!(size == 0 || size == full_size, "partial size {}", size);
                        let count = store.entry_count();
                        assert!(count == 0 || count == tiles.len(), "partial count {}", count);

                        // Once a tile is gone, no later tile may still be present
                        let mut seen_missing = false;
                        for tile in &tiles {
                            let present = store.has(tile);
                            assert!(!(seen_missing && present), "{} survived the clear", tile);
                            seen_missing |= !present;
                        }

                        let probe = tiles[rounds % tiles.len()];
                        match store.get(&probe).await {
                            Ok(bytes) => assert_eq!(bytes, vec![probe.column() as u8; 128]),
                            Err(CacheError::NotFound(_)) => {}
                            Err(e) => panic!("unexpected read error: {}", e),
                        }
                        rounds += 1;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let result = store.clear_all().await.unwrap();
        cleared.store(true, Ordering::SeqCst);

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(result.entries_removed, 64);
        assert_eq!(result.bytes_freed, full_size);
        assert_eq!(store.total_size_bytes(), 0);
    }
}
