//! Configuration.
//!
//! [`ConfigFile`] is the user-editable INI file; [`CacheConfig`] is the
//! runtime configuration an [`OfflineCache`](crate::service::OfflineCache)
//! is opened with. Convert with `CacheConfig::from(&file)`.

mod file;
mod size;

pub use file::{
    config_directory, config_file_path, default_cache_directory, CacheSettings, ConfigFile,
    ConfigFileError, DownloadSettings, SourceSettings, DEFAULT_MEMORY_CACHE_SIZE,
};
pub use size::{format_size, parse_size, whole_megabytes, SizeParseError};

use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::{RetryPolicy, DEFAULT_CONCURRENCY};
use crate::region::DEFAULT_MAX_DOWNLOAD_ZOOM;
use crate::source::DEFAULT_TIMEOUT_SECS;

/// Runtime configuration for an offline cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Root directory of the tile store.
    pub directory: PathBuf,
    /// Disk limit enforced after each completed bulk cache.
    pub max_cache_bytes: Option<u64>,
    /// Memory tier size; 0 disables the tier.
    pub memory_cache_bytes: u64,
    /// Concurrent fetches during a bulk cache.
    pub concurrency: usize,
    /// Highest zoom a bulk cache may request.
    pub max_zoom: u8,
    pub retry: RetryPolicy,
    /// Timeout applied by HTTP sources built from this configuration.
    pub request_timeout: Duration,
}

impl CacheConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            max_cache_bytes: None,
            memory_cache_bytes: DEFAULT_MEMORY_CACHE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_zoom: DEFAULT_MAX_DOWNLOAD_ZOOM,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_max_cache_bytes(mut self, max_bytes: Option<u64>) -> Self {
        self.max_cache_bytes = max_bytes;
        self
    }

    pub fn with_memory_cache_bytes(mut self, bytes: u64) -> Self {
        self.memory_cache_bytes = bytes;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_max_zoom(mut self, max_zoom: u8) -> Self {
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl From<&ConfigFile> for CacheConfig {
    fn from(file: &ConfigFile) -> Self {
        CacheConfig::new(file.cache_directory())
            .with_max_cache_bytes(file.cache.max_size)
            .with_memory_cache_bytes(file.cache.memory_size)
            .with_concurrency(file.download.concurrency)
            .with_max_zoom(file.download.max_zoom)
            .with_retry_policy(RetryPolicy::exponential(file.download.retries))
            .with_request_timeout(Duration::from_secs(file.download.timeout))
    }
}
