// =============================================================================
// Request Pacer — spaces outbound Bitget requests by a minimum interval
// =============================================================================
//
// Bitget enforces per-endpoint limits of 10–20 requests per second per UID.
// Instead of tracking each endpoint separately the pacer guarantees a fixed
// minimum gap between any two requests leaving this process (50 ms by
// default), which keeps sequential callers such as the OHLCV backfill well
// inside every endpoint's budget.
//
// Slots are reserved under a short lock and the wait happens outside it, so
// concurrent callers queue up in reservation order.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

/// Minimum-interval pacer shared by every request of one session.
pub struct RequestPacer {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
    requests_sent: AtomicU64,
    total_wait_ms: AtomicU64,
}

/// Serialisable view of the pacer counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacerSnapshot {
    pub min_interval_ms: u64,
    pub requests_sent: u64,
    pub total_wait_ms: u64,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
            requests_sent: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    /// Wait until this caller may send its request.
    pub async fn acquire(&self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "pacing outbound request");
            self.total_wait_ms
                .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
            tokio::time::sleep(wait).await;
        }
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve the next free slot at or after `now` and return how long the
    /// caller has to wait for it.
    fn reserve(&self, now: Instant) -> Duration {
        let mut next = self.next_slot.lock();
        let slot = match *next {
            Some(t) if t > now => t,
            _ => now,
        };
        *next = Some(slot + self.min_interval);
        slot - now
    }

    pub fn snapshot(&self) -> PacerSnapshot {
        PacerSnapshot {
            min_interval_ms: self.min_interval.as_millis() as u64,
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer")
            .field("min_interval", &self.min_interval)
            .field("requests_sent", &self.requests_sent.load(Ordering::Relaxed))
            .finish()
    }
}
