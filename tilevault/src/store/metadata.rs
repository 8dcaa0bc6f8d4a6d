//! Persisted tile-source identity.
//!
//! Records which tile source the cached tiles came from. The record is
//! written when a bulk cache completes and removed whenever the cache is
//! cleared; its absence means the app has no usable offline data and must
//! start online.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};

/// File name of the source record within the cache root.
pub const SOURCE_METADATA_FILE: &str = "source.json";

/// Identity of the source a completed bulk cache was downloaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Opaque source identity (e.g. a TileJSON document or URL template).
    pub identity: String,
    /// When the record was written.
    pub saved_at: DateTime<Utc>,
}

/// Reads and writes the [`SourceMetadata`] record.
#[derive(Debug, Clone)]
pub struct SourceMetadataStore {
    path: PathBuf,
}

impl SourceMetadataStore {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            path: cache_root.join(SOURCE_METADATA_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the record. A corrupt record is treated as absent.
    pub async fn load(&self) -> CacheResult<Option<SourceMetadata>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Metadata(e.to_string())),
        };

        match serde_json::from_str(&content) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring corrupt source metadata");
                Ok(None)
            }
        }
    }

    /// Writes a record for `identity`, replacing any previous one.
    pub async fn save(&self, identity: &str) -> CacheResult<SourceMetadata> {
        let metadata = SourceMetadata {
            identity: identity.to_string(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| CacheError::Metadata(e.to_string()))?;

        // Write atomically via temp file
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| CacheError::Metadata(e.to_string()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| CacheError::Metadata(e.to_string()))?;

        debug!(path = %self.path.display(), "Source metadata saved");
        Ok(metadata)
    }

    /// Removes the record. Returns whether one existed.
    pub async fn clear(&self) -> CacheResult<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Metadata(e.to_string())),
        }
    }
}
