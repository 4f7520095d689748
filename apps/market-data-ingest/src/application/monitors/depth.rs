//! Event-driven depth monitor.
//!
//! The feed pushes the full current ladder of both sides on every book
//! change. Each push becomes one `update` level per occupied position
//! (0 = best), bids first, all tagged with the same sequence number.
//! Removed levels are not synthesized as deletes; consumers reconcile a
//! sequence by absence.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MonitorCounters, MonitorExit, emit};
use crate::application::ports::{DepthBook, FeedHandle, RawLevel};
use crate::domain::instrument::Symbol;
use crate::domain::streaming::{
    BookSide, DepthLevel, DepthOperation, EventError, require_finite,
};
use crate::infrastructure::metrics;
use crate::infrastructure::queue::QueueProducer;

/// Turns pushed ladders into depth levels.
pub struct DepthMonitor {
    symbol: Symbol,
    handle: FeedHandle,
    updates: mpsc::Receiver<DepthBook>,
    queue: QueueProducer,
    counters: MonitorCounters,
}

impl DepthMonitor {
    /// Create a monitor consuming one depth subscription's updates.
    #[must_use]
    pub fn new(
        symbol: Symbol,
        handle: FeedHandle,
        updates: mpsc::Receiver<DepthBook>,
        queue: QueueProducer,
        counters: MonitorCounters,
    ) -> Self {
        Self {
            symbol,
            handle,
            updates,
            queue,
            counters,
        }
    }

    /// Run until cancelled or the feed closes the update channel.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorExit {
        let mut sequence = 0u64;
        debug!(symbol = %self.symbol, handle = %self.handle, "Depth monitor started");

        loop {
            let book = tokio::select! {
                biased;
                () = cancel.cancelled() => return MonitorExit::Cancelled,
                next = self.updates.recv() => match next {
                    Some(book) => book,
                    None => {
                        debug!(symbol = %self.symbol, "Depth update channel closed");
                        return MonitorExit::FeedClosed;
                    }
                },
            };

            let levels = match ladder_levels(&self.symbol, &book, sequence + 1, Utc::now()) {
                Ok(levels) => levels,
                Err(e) => {
                    self.counters.record_read_error();
                    metrics::record_transient_read_error("depth");
                    warn!(symbol = %self.symbol, error = %e, "Skipping malformed depth update");
                    continue;
                }
            };
            sequence += 1;

            let mut emitted = 0u64;
            for level in levels {
                if let Err(exit) = emit(&self.queue, &cancel, level.into()).await {
                    self.counters.record_emitted(emitted);
                    return exit;
                }
                emitted += 1;
            }
            self.counters.record_read_ok();
            self.counters.record_emitted(emitted);
            metrics::record_events_emitted("depth", emitted);
        }
    }
}

/// Expand one full-ladder update into depth levels.
///
/// The update is rejected as a whole if any level is not finite, so a
/// consumer never sees a partial ladder for a sequence.
///
/// # Errors
///
/// Returns [`EventError::NonFiniteValue`] for a `NaN` or infinite level.
pub fn ladder_levels(
    symbol: &str,
    book: &DepthBook,
    sequence: u64,
    timestamp: DateTime<Utc>,
) -> Result<Vec<DepthLevel>, EventError> {
    let mut levels = Vec::with_capacity(book.bids.len() + book.asks.len());
    for (side, ladder) in [(BookSide::Bid, &book.bids), (BookSide::Ask, &book.asks)] {
        for (position, level) in ladder.iter().enumerate() {
            levels.push(depth_level(symbol, side, position, level, sequence, timestamp)?);
        }
    }
    Ok(levels)
}

fn depth_level(
    symbol: &str,
    side: BookSide,
    position: usize,
    level: &RawLevel,
    sequence: u64,
    timestamp: DateTime<Utc>,
) -> Result<DepthLevel, EventError> {
    Ok(DepthLevel {
        symbol: symbol.to_string(),
        position,
        side,
        operation: DepthOperation::Update,
        price: require_finite(level.price, "price")?,
        size: require_finite(level.size, "size")?,
        sequence,
        timestamp,
    })
}
