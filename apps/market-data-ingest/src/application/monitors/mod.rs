//! Stream Monitors
//!
//! One long-lived task per subscription. Each monitor exclusively owns its
//! per-stream state (last snapshot, tick cursor, depth sequence), converts
//! raw feed values into domain events and puts them on the output queue.
//!
//! - [`QuoteMonitor`]: samples top-of-book state on a fixed interval and
//!   emits only changed snapshots.
//! - [`TickMonitor`]: follows a growing tick list with a cursor and emits
//!   only new entries.
//! - [`DepthMonitor`]: reacts to pushed full-ladder updates and emits one
//!   level per occupied position.
//!
//! Monitors stop when their [`CancellationToken`] fires, including while
//! suspended on a full queue, and emit nothing after that.

mod depth;
mod quotes;
mod ticks;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

pub use depth::DepthMonitor;
pub use quotes::{DEFAULT_QUOTE_INTERVAL, QuoteMonitor};
pub use ticks::{DEFAULT_TICK_INTERVAL, TickMonitor};

use crate::domain::streaming::MarketDataEvent;
use crate::infrastructure::queue::QueueProducer;

/// Why a monitor loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// The owning subscription was cancelled.
    Cancelled,
    /// The feed stopped delivering (session gone or push channel closed).
    FeedClosed,
    /// The output queue no longer accepts events.
    QueueClosed,
}

// =============================================================================
// Counters
// =============================================================================

/// Per-subscription counters, shared between a monitor and its observers.
#[derive(Debug, Clone, Default)]
pub struct MonitorCounters {
    inner: Arc<CounterCells>,
}

#[derive(Debug, Default)]
struct CounterCells {
    emitted: AtomicU64,
    suppressed: AtomicU64,
    read_errors: AtomicU64,
    consecutive_read_errors: AtomicU64,
    cursor_resets: AtomicU64,
    cursor: AtomicUsize,
}

/// Point-in-time copy of [`MonitorCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Events put on the queue.
    pub emitted: u64,
    /// Snapshots rejected by the change filter.
    pub suppressed: u64,
    /// Transient read errors skipped.
    pub read_errors: u64,
    /// Read errors since the last successful read.
    pub consecutive_read_errors: u64,
    /// Times the tick list shrank below the cursor.
    pub cursor_resets: u64,
    /// Tick entries processed (tick monitors only).
    pub cursor: usize,
}

impl MonitorCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current values.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        let cells = &self.inner;
        MonitorStats {
            emitted: cells.emitted.load(Ordering::Relaxed),
            suppressed: cells.suppressed.load(Ordering::Relaxed),
            read_errors: cells.read_errors.load(Ordering::Relaxed),
            consecutive_read_errors: cells.consecutive_read_errors.load(Ordering::Relaxed),
            cursor_resets: cells.cursor_resets.load(Ordering::Relaxed),
            cursor: cells.cursor.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_emitted(&self, count: u64) {
        self.inner.emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_suppressed(&self) {
        self.inner.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed read; returns the consecutive failure count.
    pub(crate) fn record_read_error(&self) -> u64 {
        self.inner.read_errors.fetch_add(1, Ordering::Relaxed);
        self.inner
            .consecutive_read_errors
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    pub(crate) fn record_read_ok(&self) {
        self.inner.consecutive_read_errors.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_cursor_reset(&self) {
        self.inner.cursor_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_cursor(&self, cursor: usize) {
        self.inner.cursor.store(cursor, Ordering::Relaxed);
    }
}

// =============================================================================
// Emission
// =============================================================================

/// Put one event, giving up as soon as the subscription is cancelled.
async fn emit(
    queue: &QueueProducer,
    cancel: &CancellationToken,
    event: MarketDataEvent,
) -> Result<(), MonitorExit> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MonitorExit::Cancelled),
        result = queue.put(event) => result.map_err(|_| MonitorExit::QueueClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_errors_reset_on_success() {
        let counters = MonitorCounters::new();
        assert_eq!(counters.record_read_error(), 1);
        assert_eq!(counters.record_read_error(), 2);
        counters.record_read_ok();
        assert_eq!(counters.record_read_error(), 1);

        let stats = counters.stats();
        assert_eq!(stats.read_errors, 3);
        assert_eq!(stats.consecutive_read_errors, 1);
    }

    #[test]
    fn clones_share_cells() {
        let counters = MonitorCounters::new();
        let observer = counters.clone();
        counters.record_emitted(4);
        counters.set_cursor(7);
        assert_eq!(observer.stats().emitted, 4);
        assert_eq!(observer.stats().cursor, 7);
    }
}
