//! Concurrency-bounded tile fetching.
//!
//! [`fetch_many`] turns a list of addresses into a stream of results with at
//! most `concurrency` requests in flight. Transient failures are retried
//! according to a [`RetryPolicy`]; exhausted retries are reported as
//! permanent. Permanent failures are yielded like any other result and never
//! stop the stream.
//!
//! # Cancellation
//!
//! The token is checked before each fetch is issued and before each retry.
//! Fetches already in flight run to completion and still yield a result;
//! addresses never issued yield nothing.

mod retry;

pub use retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_SECS,
};

use std::sync::Arc;

use futures::future;
use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::coord::TileAddress;
use crate::source::{FetchError, TileSource};

/// Default number of concurrent tile requests.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// One tile's fetch result.
pub type FetchOutcome = (TileAddress, Result<Vec<u8>, FetchError>);

/// Fetches every address from `source`, yielding results in completion order.
pub fn fetch_many<I>(
    addresses: I,
    source: Arc<dyn TileSource>,
    concurrency: usize,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> impl Stream<Item = FetchOutcome> + Send
where
    I: IntoIterator<Item = TileAddress>,
    I::IntoIter: Send,
{
    let gate = cancel.clone();

    stream::iter(addresses)
        .take_while(move |_| future::ready(!gate.is_cancelled()))
        .map(move |address| {
            let source = Arc::clone(&source);
            let retry = retry.clone();
            let cancel = cancel.clone();
            async move {
                let result = fetch_one(source.as_ref(), address, &retry, &cancel).await;
                (address, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
}

/// Fetches a single tile with retry.
///
/// Returns the last transient error unchanged if cancellation interrupts the
/// retry loop.
pub async fn fetch_one(
    source: &dyn TileSource,
    address: TileAddress,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, FetchError> {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        trace!(tile = %address, attempt, "Fetching tile");

        let err = match source.fetch(address).await {
            Ok(bytes) => return Ok(bytes),
            Err(FetchError::Permanent(reason)) => {
                debug!(tile = %address, reason = %reason, "Permanent fetch failure");
                return Err(FetchError::Permanent(reason));
            }
            Err(err) => err,
        };

        let Some(delay) = retry.delay_for_attempt(attempt) else {
            debug!(tile = %address, attempts = attempt, error = %err, "Retries exhausted");
            return Err(FetchError::Permanent(format!(
                "{} (gave up after {} attempts)",
                err.reason(),
                attempt
            )));
        };

        debug!(
            tile = %address,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient fetch failure, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }

        if cancel.is_cancelled() {
            return Err(err);
        }
    }
}
