//! Stream Scenario Integration Tests
//!
//! Drives the orchestrator against the mock feed with paused time and
//! checks what reaches the output queue.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use market_data_ingest::application::ports::{DepthBook, RawBar, RawLevel, RawQuote, RawTick};
use market_data_ingest::{
    AdapterSettings, BookSide, MarketDataAdapter, MarketDataEvent, MockFeed, OutputQueue,
    QuoteSnapshot, StreamKind, SubscriptionKey, TickKind, TradeTick,
};

const QUOTE_INTERVAL: Duration = Duration::from_millis(100);
const TICK_INTERVAL: Duration = Duration::from_millis(100);

fn settings() -> AdapterSettings {
    AdapterSettings {
        quote_interval: QUOTE_INTERVAL,
        tick_interval: TICK_INTERVAL,
        ..AdapterSettings::default()
    }
}

async fn connected_adapter(feed: &MockFeed, capacity: usize) -> (MarketDataAdapter, Arc<OutputQueue>) {
    let queue = OutputQueue::shared(capacity);
    let mut adapter = MarketDataAdapter::new(Arc::new(feed.clone()), settings(), Arc::clone(&queue));
    adapter.connect().await.unwrap();
    adapter
        .define_default_contracts(["AAPL", "MSFT"])
        .await
        .unwrap();
    (adapter, queue)
}

fn drain(queue: &OutputQueue) -> Vec<MarketDataEvent> {
    std::iter::from_fn(|| queue.try_get()).collect()
}

fn quotes(events: &[MarketDataEvent]) -> Vec<QuoteSnapshot> {
    events
        .iter()
        .filter_map(|event| match event {
            MarketDataEvent::TopOfBook(q) => Some(q.clone()),
            _ => None,
        })
        .collect()
}

fn ticks(events: &[MarketDataEvent]) -> Vec<TradeTick> {
    events
        .iter()
        .filter_map(|event| match event {
            MarketDataEvent::TickByTick(t) => Some(t.clone()),
            _ => None,
        })
        .collect()
}

fn price(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

fn tick(second: u32, px: f64) -> RawTick {
    RawTick::new(
        Some(Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, second).unwrap()),
        px,
        100.0,
    )
}

// =============================================================================
// Quotes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn unchanged_quotes_are_suppressed() {
    let feed = MockFeed::new();
    let (mut adapter, queue) = connected_adapter(&feed, 64).await;

    feed.quote("AAPL").set(RawQuote {
        bid: 150.25,
        ask: 150.26,
        ..RawQuote::unknown()
    });
    let info = adapter.subscribe_quotes("AAPL").await.unwrap();

    // Samples at 0ms and 100ms see 150.25/150.26.
    tokio::time::sleep(Duration::from_millis(150)).await;
    feed.quote("AAPL").set(RawQuote {
        bid: 150.25,
        ask: 150.26,
        ..RawQuote::unknown()
    });
    tokio::time::sleep(QUOTE_INTERVAL).await;
    feed.quote("AAPL").update(|q| q.bid = 150.30);
    tokio::time::sleep(QUOTE_INTERVAL).await;

    let emitted = quotes(&drain(&queue));
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].bid, Some(price("150.25")));
    assert_eq!(emitted[1].bid, Some(price("150.30")));
    assert_eq!(emitted[1].ask, Some(price("150.26")));
    assert!(emitted.iter().all(|q| q.symbol == "AAPL"));

    let stats = adapter.subscription(&info.key).unwrap().stats();
    assert_eq!(stats.emitted, 2);
    assert!(stats.suppressed >= 2);

    adapter.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_quote_fields_stay_absent() {
    let feed = MockFeed::new();
    let (mut adapter, queue) = connected_adapter(&feed, 64).await;

    feed.quote("MSFT").set(RawQuote {
        last: 410.5,
        ..RawQuote::unknown()
    });
    adapter.subscribe_quotes("msft").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let emitted = quotes(&drain(&queue));
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].symbol, "MSFT");
    assert_eq!(emitted[0].bid, None);
    assert_eq!(emitted[0].ask, None);
    assert_eq!(emitted[0].last, Some(price("410.5")));

    adapter.disconnect().await;
}

// =============================================================================
// Tick-by-tick
// =============================================================================

#[tokio::test(start_paused = true)]
async fn growing_tick_list_emits_each_entry_once() {
    let feed = MockFeed::new();
    let (mut adapter, queue) = connected_adapter(&feed, 64).await;
    let list = feed.ticks("AAPL", TickKind::Last);

    let info = adapter.subscribe_trades("AAPL", TickKind::Last).await.unwrap();

    // Poll at 0ms sees an empty list.
    tokio::time::sleep(Duration::from_millis(50)).await;
    list.extend((0..3).map(|i| tick(i, 150.0 + f64::from(i))));
    // Poll at 100ms sees 3, poll at 200ms still sees 3.
    tokio::time::sleep(Duration::from_millis(200)).await;
    list.extend((3..7).map(|i| tick(i, 150.0 + f64::from(i))));
    // Poll at 300ms sees 7.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let emitted = ticks(&drain(&queue));
    assert_eq!(emitted.len(), 7);
    let prices: Vec<_> = emitted.iter().map(|t| t.price.unwrap()).collect();
    let expected: Vec<_> = (150..157).map(Decimal::from).collect();
    assert_eq!(prices, expected);
    assert!(emitted.iter().all(|t| t.kind == TickKind::Last));

    let stats = adapter.subscription(&info.key).unwrap().stats();
    assert_eq!(stats.cursor, 7);
    assert_eq!(stats.emitted, 7);

    adapter.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn shrunken_tick_list_restarts_from_zero() {
    let feed = MockFeed::new();
    let (mut adapter, queue) = connected_adapter(&feed, 64).await;
    let list = feed.ticks("AAPL", TickKind::Bid);
    list.extend((0..4).map(|i| tick(i, 10.0)));

    let info = adapter
        .subscribe_trades("AAPL", TickKind::Bid)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ticks(&drain(&queue)).len(), 4);

    list.replace(vec![tick(10, 11.0), tick(11, 12.0)]);
    tokio::time::sleep(TICK_INTERVAL).await;

    let emitted = ticks(&drain(&queue));
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].price, Some(Decimal::from(11)));

    let stats = adapter.subscription(&info.key).unwrap().stats();
    assert_eq!(stats.cursor_resets, 1);
    assert_eq!(stats.cursor, 2);

    adapter.disconnect().await;
}

// =============================================================================
// Depth
// =============================================================================

#[tokio::test(start_paused = true)]
async fn pushed_ladder_becomes_one_level_per_position() {
    let feed = MockFeed::new();
    let (mut adapter, queue) = connected_adapter(&feed, 64).await;
    adapter.subscribe_depth("AAPL", 5).await.unwrap();

    let book = DepthBook {
        bids: vec![RawLevel::new(150.00, 300.0), RawLevel::new(149.99, 500.0)],
        asks: vec![RawLevel::new(150.01, 200.0)],
    };
    assert!(feed.push_depth("AAPL", book.clone()).await);
    assert!(feed.push_depth("AAPL", book).await);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let levels: Vec<_> = drain(&queue)
        .into_iter()
        .filter_map(|event| match event {
            MarketDataEvent::MarketDepth(level) => Some(level),
            _ => None,
        })
        .collect();
    assert_eq!(levels.len(), 6);

    let first: Vec<_> = levels.iter().filter(|l| l.sequence == 1).collect();
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].side, BookSide::Bid);
    assert_eq!(first[0].position, 0);
    assert_eq!(first[0].price, price("150.00"));
    assert_eq!(first[1].position, 1);
    assert_eq!(first[2].side, BookSide::Ask);
    assert_eq!(first[2].position, 0);
    assert!(levels.iter().filter(|l| l.sequence == 2).count() == 3);

    adapter.disconnect().await;
}

// =============================================================================
// Request / response
// =============================================================================

#[tokio::test]
async fn historical_and_fundamentals_are_queued_once() {
    let feed = MockFeed::new();
    let (adapter, queue) = connected_adapter(&feed, 64).await;

    let bar = |minute: u32, high: f64, low: f64| RawBar {
        date: Utc.with_ymd_and_hms(2024, 3, 1, 14, minute, 0).unwrap(),
        open: 150.0,
        high,
        low,
        close: 150.5,
        volume: 1_000.0,
        bar_count: Some(12),
        average: Some(150.2),
    };
    feed.set_history("AAPL", vec![bar(30, 151.0, 149.5), bar(31, 151.2, 150.1)]);
    feed.set_fundamentals("AAPL", "ReportSnapshot", "<xml/>");

    let queued = adapter
        .request_historical("AAPL", "1 D", "1 min")
        .await
        .unwrap();
    assert_eq!(queued, 2);
    adapter
        .request_fundamentals("AAPL", "ReportSnapshot")
        .await
        .unwrap();

    let events = drain(&queue);
    assert_eq!(events.len(), 2);
    match &events[0] {
        MarketDataEvent::HistoricalData(batch) => {
            assert_eq!(batch.symbol, "AAPL");
            assert_eq!(batch.duration, "1 D");
            assert_eq!(batch.bar_size, "1 min");
            assert_eq!(batch.bars.len(), 2);
            assert!(batch.bars[0].date < batch.bars[1].date);
        }
        other => panic!("unexpected event {other:?}"),
    }
    match &events[1] {
        MarketDataEvent::FundamentalData(report) => {
            assert_eq!(report.report_kind, "ReportSnapshot");
            assert_eq!(report.payload, "<xml/>");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

// =============================================================================
// Backpressure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn full_queue_suspends_monitor_until_cancelled() {
    let feed = MockFeed::new();
    let (mut adapter, queue) = connected_adapter(&feed, 2).await;
    let list = feed.ticks("AAPL", TickKind::Last);
    list.extend((0..5).map(|i| tick(i, 100.0 + f64::from(i))));

    let info = adapter.subscribe_trades("AAPL", TickKind::Last).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Two events fit, the third put is parked.
    assert_eq!(queue.len(), 2);
    assert_eq!(adapter.current_queue_size(), 2);
    assert_eq!(adapter.running_monitors(), 1);

    assert!(adapter.cancel(&info.key).await.unwrap());
    assert_eq!(adapter.running_monitors(), 0);
    assert!(
        adapter
            .subscription(&SubscriptionKey::new("AAPL", StreamKind::Trades(TickKind::Last)))
            .is_none()
    );

    // Nothing is emitted after cancellation even once space frees up.
    let first = drain(&queue);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(queue.is_empty());
    assert_eq!(ticks(&first).len(), 2);
    assert_eq!(ticks(&first)[0].price, Some(Decimal::from(100)));
}
