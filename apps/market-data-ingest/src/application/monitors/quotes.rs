//! Poll-based quote monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MonitorCounters, MonitorExit, emit};
use crate::application::ports::{FeedError, QuoteSource};
use crate::domain::filter::ChangeFilter;
use crate::domain::instrument::Symbol;
use crate::domain::streaming::QuoteSnapshot;
use crate::infrastructure::metrics;
use crate::infrastructure::queue::QueueProducer;

/// Default sampling interval.
pub const DEFAULT_QUOTE_INTERVAL: Duration = Duration::from_millis(100);

/// Samples top-of-book state and emits snapshots that differ from the last
/// one emitted.
pub struct QuoteMonitor {
    symbol: Symbol,
    source: Arc<dyn QuoteSource>,
    queue: QueueProducer,
    interval: Duration,
    counters: MonitorCounters,
}

impl QuoteMonitor {
    /// Create a monitor for one symbol.
    #[must_use]
    pub fn new(
        symbol: Symbol,
        source: Arc<dyn QuoteSource>,
        queue: QueueProducer,
        interval: Duration,
        counters: MonitorCounters,
    ) -> Self {
        Self {
            symbol,
            source,
            queue,
            interval,
            counters,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> MonitorExit {
        let mut filter = ChangeFilter::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(symbol = %self.symbol, handle = %self.source.handle(), "Quote monitor started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return MonitorExit::Cancelled,
                _ = ticker.tick() => {}
            }

            let raw = match self.source.read() {
                Ok(raw) => {
                    self.counters.record_read_ok();
                    raw
                }
                Err(FeedError::Disconnected) => {
                    warn!(symbol = %self.symbol, "Quote source disconnected");
                    return MonitorExit::FeedClosed;
                }
                Err(e) => {
                    let consecutive = self.counters.record_read_error();
                    metrics::record_transient_read_error("quotes");
                    warn!(
                        symbol = %self.symbol,
                        error = %e,
                        consecutive,
                        "Quote read failed, skipping cycle"
                    );
                    continue;
                }
            };

            let snapshot = QuoteSnapshot::from_raw(
                self.symbol.clone(),
                raw.bid,
                raw.ask,
                raw.last,
                raw.volume,
                raw.time,
            );

            if !filter.admit(&snapshot) {
                self.counters.record_suppressed();
                metrics::record_snapshot_suppressed();
                continue;
            }

            if let Err(exit) = emit(&self.queue, &cancel, snapshot.into()).await {
                return exit;
            }
            self.counters.record_emitted(1);
            metrics::record_events_emitted("quotes", 1);
        }
    }
}
