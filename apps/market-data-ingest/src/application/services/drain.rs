//! Queue Drain
//!
//! Moves events from the output queue to a [`MarketDataSink`] in batches.
//! A batch is written when it reaches `batch_size` events or when
//! `flush_interval` elapses, whichever comes first.
//!
//! On cancellation the drain closes the queue, writes everything still in
//! it and flushes the sink before returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::application::ports::MarketDataSink;
use crate::domain::streaming::MarketDataEvent;
use crate::infrastructure::config::DrainSettings;
use crate::infrastructure::metrics::{self, SinkOutcome};
use crate::infrastructure::queue::OutputQueue;

/// Totals reported when the drain stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Events accepted by the sink.
    pub events_written: u64,
    /// Batches accepted by the sink.
    pub batches_written: u64,
    /// Batches the sink rejected.
    pub batches_failed: u64,
    /// Events lost with rejected batches.
    pub events_dropped: u64,
}

/// Batches queue output into a sink.
pub struct QueueDrain {
    queue: Arc<OutputQueue>,
    sink: Arc<dyn MarketDataSink>,
    batch_size: usize,
    flush_interval: Duration,
}

impl QueueDrain {
    /// Create a drain. `batch_size` is at least 1.
    #[must_use]
    pub fn new(
        queue: Arc<OutputQueue>,
        sink: Arc<dyn MarketDataSink>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            queue,
            sink,
            batch_size: batch_size.max(1),
            flush_interval,
        }
    }

    /// Create a drain from service configuration.
    #[must_use]
    pub fn from_settings(
        queue: Arc<OutputQueue>,
        sink: Arc<dyn MarketDataSink>,
        settings: &DrainSettings,
    ) -> Self {
        Self::new(queue, sink, settings.batch_size, settings.flush_interval)
    }

    /// Run until cancelled or the queue closes.
    pub async fn run(self, cancel: CancellationToken) -> DrainStats {
        let mut stats = DrainStats::default();
        let mut batch = Vec::with_capacity(self.batch_size.min(1024));
        let mut unflushed = false;

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(batch_size = self.batch_size, "Queue drain started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.write(&mut batch, &mut stats).await;
                        unflushed = true;
                    }
                    if unflushed {
                        self.flush().await;
                        unflushed = false;
                    }
                }
                next = self.queue.get() => {
                    let Some(event) = next else { break };
                    batch.push(event);
                    if batch.len() >= self.batch_size {
                        self.write(&mut batch, &mut stats).await;
                        unflushed = true;
                    }
                }
            }
        }

        self.queue.close();
        while let Some(event) = self.queue.get().await {
            batch.push(event);
            if batch.len() >= self.batch_size {
                self.write(&mut batch, &mut stats).await;
            }
        }
        if !batch.is_empty() {
            self.write(&mut batch, &mut stats).await;
        }
        self.flush().await;

        info!(
            events = stats.events_written,
            batches = stats.batches_written,
            failed = stats.batches_failed,
            "Queue drain stopped"
        );
        stats
    }

    async fn write(&self, batch: &mut Vec<MarketDataEvent>, stats: &mut DrainStats) {
        let count = batch.len() as u64;
        match self.sink.write_batch(batch).await {
            Ok(()) => {
                stats.events_written += count;
                stats.batches_written += 1;
                metrics::record_sink_batch(SinkOutcome::Written);
                debug!(events = count, "Batch written");
            }
            Err(e) => {
                stats.batches_failed += 1;
                stats.events_dropped += count;
                metrics::record_sink_batch(SinkOutcome::Failed);
                error!(events = count, error = %e, "Sink rejected batch");
            }
        }
        batch.clear();
        metrics::set_queue_depth(self.queue.len());
    }

    async fn flush(&self) {
        if let Err(e) = self.sink.flush().await {
            error!(error = %e, "Sink flush failed");
        }
    }
}
