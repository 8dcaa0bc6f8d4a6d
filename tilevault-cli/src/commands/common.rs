//! Shared argument types and setup for CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tilevault::config::ConfigFile;
use tilevault::{BoundingBox, CacheConfig, HttpTileSource, LatLon, OfflineCache, TileSource};

use crate::error::CliError;

/// Options accepted by every command.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Config file (default: ~/.tilevault/config.ini)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding the config file
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Tile URL template with {z}, {x}, {y}, overriding the config file
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Also print log output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// A bounding box given as four edges.
#[derive(Debug, Clone, Copy, Args)]
pub struct RegionArgs {
    /// Southern edge latitude
    #[arg(long, allow_hyphen_values = true)]
    pub south: f64,
    /// Western edge longitude
    #[arg(long, allow_hyphen_values = true)]
    pub west: f64,
    /// Northern edge latitude
    #[arg(long, allow_hyphen_values = true)]
    pub north: f64,
    /// Eastern edge longitude
    #[arg(long, allow_hyphen_values = true)]
    pub east: f64,
    /// Lowest zoom level to cache
    #[arg(long)]
    pub min_zoom: u8,
    /// Highest zoom level to cache (default: config max_zoom)
    #[arg(long)]
    pub max_zoom: Option<u8>,
}

impl RegionArgs {
    pub fn bounding_box(&self) -> Result<BoundingBox, CliError> {
        Ok(BoundingBox::new(
            LatLon::new(self.south, self.west),
            LatLon::new(self.north, self.east),
        )?)
    }

    pub fn max_zoom_or(&self, default: u8) -> u8 {
        self.max_zoom.unwrap_or(default)
    }
}

/// Loaded configuration plus CLI overrides.
pub struct Context {
    pub file: ConfigFile,
    pub config: CacheConfig,
}

impl Context {
    pub fn load(global: &GlobalArgs) -> Result<Self, CliError> {
        let mut file = match &global.config {
            Some(path) => ConfigFile::load_from(path),
            None => ConfigFile::load(),
        }
        .map_err(|e| CliError::Config(e.to_string()))?;

        if let Some(dir) = &global.cache_dir {
            file.cache.directory = Some(dir.clone());
        }
        if let Some(url) = &global.url {
            file.source.url = Some(url.clone());
        }

        let config = CacheConfig::from(&file);
        Ok(Self { file, config })
    }

    /// Builds the configured HTTP source, if a URL is set.
    pub fn source(&self) -> Result<Option<Arc<dyn TileSource>>, CliError> {
        let Some(url) = &self.file.source.url else {
            return Ok(None);
        };

        let mut source = HttpTileSource::with_timeout(url.as_str(), self.config.request_timeout)?;
        if let Some(identity) = &self.file.source.identity {
            source = source.with_identity(identity.as_str());
        }
        Ok(Some(Arc::new(source)))
    }

    pub async fn open_cache(&self) -> Result<OfflineCache, CliError> {
        Ok(OfflineCache::open(self.config.clone(), self.source()?).await?)
    }
}

/// Formats a count with thousands separators, e.g. `12,345`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
