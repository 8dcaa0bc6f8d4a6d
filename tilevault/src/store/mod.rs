//! Tile storage.
//!
//! - [`TileStore`]: durable on-disk store with incremental size accounting
//! - [`MemoryTier`]: optional in-memory LRU in front of the disk store
//! - [`SourceMetadataStore`]: the persisted tile-source identity record

mod disk;
mod memory;
mod metadata;

pub use disk::{RemovalResult, TileRecord, TileStore};
pub use memory::MemoryTier;
pub use metadata::{SourceMetadata, SourceMetadataStore, SOURCE_METADATA_FILE};
