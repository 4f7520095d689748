//! Incremental-list tick monitor.
//!
//! The feed exposes an append-only list of ticks per subscription. The
//! monitor keeps a cursor (entries already processed) and on every poll
//! emits `[cursor, len)` in list order, then moves the cursor to `len`.
//! Each index is emitted exactly once. If the list ever shrinks below the
//! cursor the feed has reset it: the cursor restarts at zero and every
//! entry now present is treated as new.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MonitorCounters, MonitorExit, emit};
use crate::application::ports::TickSource;
use crate::domain::instrument::Symbol;
use crate::domain::streaming::{TickKind, TradeTick};
use crate::infrastructure::metrics;
use crate::infrastructure::queue::QueueProducer;

/// Default poll interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Follows a growing tick list and emits only new entries.
pub struct TickMonitor {
    symbol: Symbol,
    kind: TickKind,
    source: Arc<dyn TickSource>,
    queue: QueueProducer,
    interval: Duration,
    counters: MonitorCounters,
}

impl TickMonitor {
    /// Create a monitor for one symbol and tick kind.
    #[must_use]
    pub fn new(
        symbol: Symbol,
        kind: TickKind,
        source: Arc<dyn TickSource>,
        queue: QueueProducer,
        interval: Duration,
        counters: MonitorCounters,
    ) -> Self {
        Self {
            symbol,
            kind,
            source,
            queue,
            interval,
            counters,
        }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) -> MonitorExit {
        let mut cursor = 0usize;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            symbol = %self.symbol,
            kind = %self.kind,
            handle = %self.source.handle(),
            "Tick monitor started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return MonitorExit::Cancelled,
                _ = ticker.tick() => {}
            }

            let mut window = self.source.read_from(cursor);
            if window.len < cursor {
                warn!(
                    symbol = %self.symbol,
                    kind = %self.kind,
                    cursor,
                    len = window.len,
                    "Tick list shrank below cursor, re-reading from start"
                );
                self.counters.record_cursor_reset();
                metrics::record_tick_cursor_reset();
                cursor = 0;
                self.counters.set_cursor(0);
                window = self.source.read_from(0);
            }

            let mut emitted = 0u64;
            for raw in window.ticks {
                let index = cursor;
                cursor += 1;
                self.counters.set_cursor(cursor);

                let tick = match TradeTick::from_raw(
                    self.symbol.clone(),
                    self.kind,
                    raw.time,
                    raw.price,
                    raw.size,
                    raw.attributes,
                ) {
                    Ok(tick) => tick,
                    Err(e) => {
                        self.counters.record_read_error();
                        metrics::record_transient_read_error("trades");
                        warn!(symbol = %self.symbol, index, error = %e, "Skipping malformed tick");
                        continue;
                    }
                };

                if let Err(exit) = emit(&self.queue, &cancel, tick.into()).await {
                    self.flush_counts(emitted);
                    return exit;
                }
                emitted += 1;
            }
            self.counters.record_read_ok();
            self.flush_counts(emitted);
        }
    }

    fn flush_counts(&self, emitted: u64) {
        if emitted > 0 {
            self.counters.record_emitted(emitted);
            metrics::record_events_emitted("trades", emitted);
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{FeedHandle, RawTick};
    use crate::domain::streaming::MarketDataEvent;
    use crate::infrastructure::feed::TickList;
    use crate::infrastructure::queue::OutputQueue;

    fn tick(price: f64) -> RawTick {
        RawTick::new(None, price, 100.0)
    }

    fn emitted_prices(queue: &OutputQueue) -> Vec<Decimal> {
        std::iter::from_fn(|| queue.try_get())
            .map(|event| match event {
                MarketDataEvent::TickByTick(t) => t.price.unwrap(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect()
    }

    fn prices(values: &[i64]) -> Vec<Decimal> {
        values.iter().copied().map(Decimal::from).collect()
    }

    fn spawn_monitor(
        list: &TickList,
        queue: &OutputQueue,
        counters: &MonitorCounters,
    ) -> (CancellationToken, tokio::task::JoinHandle<MonitorExit>) {
        let cancel = CancellationToken::new();
        let monitor = TickMonitor::new(
            "AAPL".into(),
            TickKind::Last,
            Arc::new(list.clone()),
            queue.producer(),
            DEFAULT_TICK_INTERVAL,
            counters.clone(),
        );
        (cancel.clone(), tokio::spawn(monitor.run(cancel)))
    }

    #[tokio::test(start_paused = true)]
    async fn growth_zero_three_three_seven_emits_seven() {
        let list = TickList::new(FeedHandle(2));
        let queue = OutputQueue::new(64);
        let counters = MonitorCounters::new();
        let (cancel, task) = spawn_monitor(&list, &queue, &counters);

        tokio::time::sleep(Duration::from_millis(15)).await;
        list.extend((1..=3).map(|i| tick(f64::from(i))));
        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        list.extend((4..=7).map(|i| tick(f64::from(i))));
        tokio::time::sleep(Duration::from_millis(10)).await;

        cancel.cancel();
        assert_eq!(task.await.unwrap(), MonitorExit::Cancelled);

        assert_eq!(emitted_prices(&queue), prices(&[1, 2, 3, 4, 5, 6, 7]));
        assert_eq!(counters.stats().cursor, 7);
        assert_eq!(counters.stats().emitted, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_list_resets_cursor() {
        let list = TickList::new(FeedHandle(2));
        let queue = OutputQueue::new(64);
        let counters = MonitorCounters::new();
        list.extend([tick(1.0), tick(2.0), tick(3.0)]);

        let (cancel, task) = spawn_monitor(&list, &queue, &counters);
        tokio::time::sleep(Duration::from_millis(15)).await;

        list.replace(vec![tick(9.0)]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(emitted_prices(&queue), prices(&[1, 2, 3, 9]));
        let stats = counters.stats();
        assert_eq!(stats.cursor_resets, 1);
        assert_eq!(stats.cursor, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_list_reports_cursor_at_zero() {
        let list = TickList::new(FeedHandle(2));
        let queue = OutputQueue::new(64);
        let counters = MonitorCounters::new();
        list.extend([tick(1.0), tick(2.0), tick(3.0)]);

        let (cancel, task) = spawn_monitor(&list, &queue, &counters);
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(counters.stats().cursor, 3);

        list.replace(Vec::new());
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(emitted_prices(&queue), prices(&[1, 2, 3]));
        let stats = counters.stats();
        assert_eq!(stats.cursor_resets, 1);
        assert_eq!(stats.cursor, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_tick_is_skipped_without_a_gap() {
        let list = TickList::new(FeedHandle(2));
        let queue = OutputQueue::new(64);
        let counters = MonitorCounters::new();
        list.extend([tick(1.0), tick(0.0), tick(3.0)]);

        let (cancel, task) = spawn_monitor(&list, &queue, &counters);
        tokio::time::sleep(Duration::from_millis(15)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(emitted_prices(&queue), prices(&[1, 3]));
        assert_eq!(counters.stats().cursor, 3);
        assert_eq!(counters.stats().read_errors, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn concatenated_emissions_equal_the_list(growth in proptest::collection::vec(0usize..6, 1..12)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let (emitted, expected) = runtime.block_on(async {
                let list = TickList::new(FeedHandle(2));
                let queue = OutputQueue::new(1_024);
                let counters = MonitorCounters::new();
                let (cancel, task) = spawn_monitor(&list, &queue, &counters);

                tokio::time::sleep(Duration::from_millis(5)).await;
                let mut next = 1u32;
                for step in &growth {
                    list.extend((0..*step).map(|_| {
                        let price = f64::from(next);
                        next += 1;
                        tick(price)
                    }));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
                task.await.unwrap();

                let expected: Vec<Decimal> = (1..next).map(Decimal::from).collect();
                (emitted_prices(&queue), expected)
            });

            prop_assert_eq!(emitted, expected);
        }
    }
}
