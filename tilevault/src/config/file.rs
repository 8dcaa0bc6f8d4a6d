//! Configuration file handling for ~/.tilevault/config.ini.
//!
//! ```ini
//! [cache]
//! directory = ~/offline-tiles
//! max_size = 2GB
//! memory_size = 64MB
//!
//! [download]
//! concurrency = 8
//! max_zoom = 17
//! retries = 3
//! timeout = 30
//!
//! [source]
//! url = https://tile.openstreetmap.org/{z}/{x}/{y}.png
//! identity = osm-standard
//! ```

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::size::{format_size, parse_size};
use crate::fetch::{DEFAULT_CONCURRENCY, DEFAULT_MAX_ATTEMPTS};
use crate::region::DEFAULT_MAX_DOWNLOAD_ZOOM;
use crate::source::DEFAULT_TIMEOUT_SECS;

/// Default memory tier size (64MB).
pub const DEFAULT_MEMORY_CACHE_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    #[error("Failed to write config file: {0}")]
    WriteError(String),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Cache root. `None` uses the platform cache directory.
    pub directory: Option<PathBuf>,
    /// Disk size limit enforced after each bulk cache. `None` is unlimited.
    pub max_size: Option<u64>,
    /// Memory tier size; 0 disables the tier.
    pub memory_size: u64,
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub concurrency: usize,
    pub max_zoom: u8,
    /// Attempts per tile, including the first.
    pub retries: u32,
    /// Request timeout in seconds.
    pub timeout: u64,
}

/// `[source]` section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceSettings {
    /// URL template with `{z}`, `{x}`, `{y}` placeholders.
    pub url: Option<String>,
    /// Identity recorded after a successful bulk cache. Defaults to the URL.
    pub identity: Option<String>,
}

/// Parsed contents of `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub download: DownloadSettings,
    pub source: SourceSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                directory: None,
                max_size: None,
                memory_size: DEFAULT_MEMORY_CACHE_SIZE,
            },
            download: DownloadSettings {
                concurrency: DEFAULT_CONCURRENCY,
                max_zoom: DEFAULT_MAX_DOWNLOAD_ZOOM,
                retries: DEFAULT_MAX_ATTEMPTS,
                timeout: DEFAULT_TIMEOUT_SECS,
            },
            source: SourceSettings::default(),
        }
    }
}

impl ConfigFile {
    /// Loads configuration from the default path (~/.tilevault/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads configuration from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Saves configuration to `path`, creating its directory if needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        std::fs::write(path, to_config_string(self))
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// The configured cache directory, or the platform default.
    pub fn cache_directory(&self) -> PathBuf {
        self.cache
            .directory
            .clone()
            .unwrap_or_else(default_cache_directory)
    }
}

/// Path to the config directory (~/.tilevault).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tilevault")
}

/// Path to the config file (~/.tilevault/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

/// Platform cache directory for tiles (e.g. ~/.cache/tilevault on Linux).
pub fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilevault")
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Overlays values found in `ini` on top of the defaults.
fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = Some(expand_tilde(v));
            }
        }
        if let Some(v) = section.get("max_size") {
            let v = v.trim();
            config.cache.max_size = if v.is_empty() {
                None
            } else {
                let bytes = parse_size(v).map_err(|_| {
                    invalid("cache", "max_size", v, "expected format like '2GB' or '500MB'")
                })?;
                (bytes > 0).then_some(bytes)
            };
        }
        if let Some(v) = section.get("memory_size") {
            config.cache.memory_size = parse_size(v).map_err(|_| {
                invalid("cache", "memory_size", v, "expected format like '64MB' or '1GB'")
            })?;
        }
    }

    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("concurrency") {
            config.download.concurrency = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("download", "concurrency", v, "must be a positive integer")),
            };
        }
        if let Some(v) = section.get("max_zoom") {
            config.download.max_zoom = match v.trim().parse::<u8>() {
                Ok(n) if n <= crate::coord::MAX_ZOOM => n,
                _ => return Err(invalid("download", "max_zoom", v, "must be between 0 and 30")),
            };
        }
        if let Some(v) = section.get("retries") {
            config.download.retries = match v.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("download", "retries", v, "must be a positive integer")),
            };
        }
        if let Some(v) = section.get("timeout") {
            config.download.timeout = v.trim().parse().map_err(|_| {
                invalid("download", "timeout", v, "must be a positive integer (seconds)")
            })?;
        }
    }

    if let Some(section) = ini.section(Some("source")) {
        if let Some(v) = section.get("url") {
            let v = v.trim();
            if !v.is_empty() {
                if !(v.contains("{z}") && v.contains("{x}") && v.contains("{y}")) {
                    return Err(invalid(
                        "source",
                        "url",
                        v,
                        "must contain {z}, {x} and {y} placeholders",
                    ));
                }
                config.source.url = Some(v.to_string());
            }
        }
        if let Some(v) = section.get("identity") {
            let v = v.trim();
            if !v.is_empty() {
                config.source.identity = Some(v.to_string());
            }
        }
    }

    Ok(config)
}

fn to_config_string(config: &ConfigFile) -> String {
    let directory = config
        .cache
        .directory
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let max_size = config.cache.max_size.map(format_size).unwrap_or_default();

    format!(
        r#"[cache]
; Directory for cached tiles. If empty, defaults to the platform cache
; directory (e.g. ~/.cache/tilevault on Linux)
directory = {}
; Disk limit enforced after each bulk cache (empty = unlimited)
; Supports: KB, MB, GB suffixes (e.g., 500MB, 2GB)
max_size = {}
; In-memory tier for repeated single-tile reads (0 disables)
memory_size = {}

[download]
; Concurrent tile requests
concurrency = {}
; Highest zoom level a bulk cache may request
max_zoom = {}
; Attempts per tile, including the first
retries = {}
; Request timeout in seconds
timeout = {}

[source]
; Tile URL template with {{z}}, {{x}}, {{y}} placeholders
url = {}
; Identity recorded after a successful bulk cache (defaults to url)
identity = {}
"#,
        directory,
        max_size,
        format_size(config.cache.memory_size),
        config.download.concurrency,
        config.download.max_zoom,
        config.download.retries,
        config.download.timeout,
        config.source.url.as_deref().unwrap_or(""),
        config.source.identity.as_deref().unwrap_or(""),
    )
}
