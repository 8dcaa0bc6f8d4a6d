//! Remote tile source abstraction.
//!
//! A [`TileSource`] is the opaque fetch capability the cache downloads from.
//! The HTTP implementation is [`HttpTileSource`]; tests substitute scripted
//! sources.
//!
//! # Dyn Compatibility
//!
//! `fetch` returns a boxed future so the facade can hold an
//! `Arc<dyn TileSource>` and the fetch pipeline can drive any source
//! polymorphically.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::{HttpTileSource, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::coord::TileAddress;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure fetching a single tile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// May succeed if retried (timeouts, connection resets, 5xx, 429).
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Will not succeed on retry (404, malformed response, exhausted retries).
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            FetchError::Transient(reason) | FetchError::Permanent(reason) => reason,
        }
    }

    /// Converts to the facade error for `address`.
    pub fn into_cache_error(self, address: TileAddress) -> crate::error::CacheError {
        match self {
            FetchError::Transient(reason) => {
                crate::error::CacheError::FetchTransient { address, reason }
            }
            FetchError::Permanent(reason) => {
                crate::error::CacheError::FetchPermanent { address, reason }
            }
        }
    }
}

/// A remote source of encoded tile images.
pub trait TileSource: Send + Sync {
    /// Fetches the encoded bytes of one tile.
    fn fetch(&self, address: TileAddress) -> BoxFuture<'_, Result<Vec<u8>, FetchError>>;

    /// Stable identity of this source, persisted after a successful bulk
    /// cache so later runs can tell which source the offline tiles are from.
    fn identity(&self) -> &str;
}
