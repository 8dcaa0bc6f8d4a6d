//! HTTP tile source using reqwest.
//!
//! Tiles are requested from a URL template in which `{z}`, `{x}` and `{y}`
//! are replaced by zoom, column and row, e.g.
//! `https://tile.openstreetmap.org/{z}/{x}/{y}.png`.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, trace, warn};

use super::{BoxFuture, FetchError, TileSource};
use crate::coord::TileAddress;

/// Default timeout for tile requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent sent with every tile request.
pub const DEFAULT_USER_AGENT: &str = concat!("tilevault/", env!("CARGO_PKG_VERSION"));

/// Tile source that downloads over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
    url_template: String,
    identity: String,
}

impl HttpTileSource {
    /// Creates a source for `url_template` with the default timeout.
    ///
    /// The template doubles as the source identity.
    pub fn new(url_template: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeout(url_template, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a source with a custom request timeout.
    pub fn with_timeout(
        url_template: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let url_template = url_template.into();
        for placeholder in ["{z}", "{x}", "{y}"] {
            if !url_template.contains(placeholder) {
                return Err(FetchError::Permanent(format!(
                    "URL template '{}' is missing {}",
                    url_template, placeholder
                )));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| FetchError::Permanent(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            identity: url_template.clone(),
            url_template,
        })
    }

    /// Overrides the identity persisted after a successful bulk cache.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Builds the request URL for a tile.
    pub fn build_url(&self, address: &TileAddress) -> String {
        self.url_template
            .replace("{z}", &address.zoom().to_string())
            .replace("{x}", &address.column().to_string())
            .replace("{y}", &address.row().to_string())
    }

    async fn get(&self, url: String) -> Result<Vec<u8>, FetchError> {
        trace!(url = %url, "HTTP GET request starting");

        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(
                    url = %url,
                    error = %e,
                    is_connect = e.is_connect(),
                    is_timeout = e.is_timeout(),
                    "HTTP request failed"
                );
                return Err(classify_request_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "HTTP error status");
            return Err(classify_status(status, &url));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(format!("Failed to read response: {}", e)))?;

        if bytes.is_empty() {
            return Err(FetchError::Permanent(format!("Empty tile body from {}", url)));
        }

        trace!(url = %url, bytes = bytes.len(), "HTTP response body read");
        Ok(bytes.to_vec())
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&self, address: TileAddress) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        let url = self.build_url(&address);
        Box::pin(self.get(url))
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

fn classify_request_error(e: &reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::Permanent(format!("Invalid request: {}", e))
    } else {
        FetchError::Transient(format!("Request failed: {}", e))
    }
}

/// Throttling, timeouts and server errors are worth retrying; any other
/// non-success status is not.
fn classify_status(status: StatusCode, url: &str) -> FetchError {
    let message = format!("HTTP {} from {}", status, url);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}
