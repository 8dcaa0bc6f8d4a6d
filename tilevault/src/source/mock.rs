//! Scripted tile source for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{BoxFuture, FetchError, TileSource};
use crate::coord::TileAddress;

/// Mock source returning `"{z}/{x}/{y}"` as the tile body.
pub struct MockTileSource {
    identity: String,
    delay: Option<Duration>,
    permanent: HashSet<TileAddress>,
    transient_remaining: Mutex<HashMap<TileAddress, u32>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTileSource {
    pub fn new() -> Self {
        Self {
            identity: "mock://tiles/{z}/{x}/{y}".to_string(),
            delay: None,
            permanent: HashSet::new(),
            transient_remaining: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_permanently(mut self, address: TileAddress) -> Self {
        self.permanent.insert(address);
        self
    }

    /// Fails `address` transiently `times` times before succeeding.
    pub fn failing_transiently(self, address: TileAddress, times: u32) -> Self {
        self.transient_remaining.lock().insert(address, times);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn body_for(address: &TileAddress) -> Vec<u8> {
        address.to_string().into_bytes()
    }

    async fn respond(&self, address: TileAddress) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.permanent.contains(&address) {
            Err(FetchError::Permanent(format!("HTTP 404 for {}", address)))
        } else {
            let mut remaining = self.transient_remaining.lock();
            match remaining.get_mut(&address) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(FetchError::Transient(format!("HTTP 503 for {}", address)))
                }
                _ => Ok(Self::body_for(&address)),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl TileSource for MockTileSource {
    fn fetch(&self, address: TileAddress) -> BoxFuture<'_, Result<Vec<u8>, FetchError>> {
        Box::pin(self.respond(address))
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}
