//! Error types for the offline tile cache.

use thiserror::Error;

use crate::coord::TileAddress;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache facade and its components.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The bounding box or zoom range is malformed.
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// The requested maximum zoom exceeds the configured ceiling.
    #[error("Zoom level {requested} exceeds maximum download zoom {max}")]
    ZoomOutOfRange { requested: u8, max: u8 },

    /// Tile coordinates fall outside the grid for their zoom level.
    #[error("Invalid tile address {zoom}/{column}/{row}")]
    InvalidAddress { zoom: u8, column: u32, row: u32 },

    /// A bulk cache job is already running on this cache.
    #[error("A bulk cache job is already running (job {0})")]
    JobAlreadyRunning(u64),

    /// The tile is not cached and no source is available to fetch it.
    #[error("Tile {0} not found in cache")]
    NotFound(TileAddress),

    /// Storage is full or unavailable.
    #[error("Tile store write failed: {0}")]
    WriteError(#[source] std::io::Error),

    /// A stored tile exists but could not be read back.
    #[error("Tile store read failed: {0}")]
    ReadError(#[source] std::io::Error),

    /// A fetch failed in a way that may succeed if retried.
    #[error("Transient fetch failure for tile {address}: {reason}")]
    FetchTransient { address: TileAddress, reason: String },

    /// A fetch failed after exhausting retries, or failed permanently.
    #[error("Permanent fetch failure for tile {address}: {reason}")]
    FetchPermanent { address: TileAddress, reason: String },

    /// A bulk cache was requested but the cache has no tile source.
    #[error("No tile source configured")]
    NoSource,

    /// Persisted source metadata could not be read or written.
    #[error("Source metadata error: {0}")]
    Metadata(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_out_of_range_display() {
        let err = CacheError::ZoomOutOfRange {
            requested: 19,
            max: 17,
        };
        let msg = err.to_string();
        assert!(msg.contains("19"));
        assert!(msg.contains("17"));
    }

    #[test]
    fn test_not_found_display_includes_address() {
        let address = TileAddress::new(13, 1308, 3165).unwrap();
        let err = CacheError::NotFound(address);
        assert_eq!(err.to_string(), "Tile 13/1308/3165 not found in cache");
    }

    #[test]
    fn test_write_error_has_source() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = CacheError::WriteError(io_err);
        assert!(err.source().is_some());
    }
}
