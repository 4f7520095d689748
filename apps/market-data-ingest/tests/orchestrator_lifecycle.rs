//! Orchestrator Lifecycle Integration Tests
//!
//! Connection, subscription bookkeeping, capability fallback, teardown
//! order and the end-to-end path into a sink.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use market_data_ingest::application::ports::RawQuote;
use market_data_ingest::infrastructure::feed::FeedCall;
use market_data_ingest::infrastructure::reconnect::{ReconnectConfig, ReconnectPolicy};
use market_data_ingest::{
    AdapterSettings, DepthMode, IngestError, JsonLinesSink, MarketDataAdapter, MarketDataEvent,
    MemorySink, MockFeed, OutputQueue, QueueDrain, SimulatedFeed, SimulationConfig, StreamKind,
    StreamParams, SubscriptionKey, TickKind,
};

fn adapter_for(feed: &MockFeed, capacity: usize) -> (MarketDataAdapter, Arc<OutputQueue>) {
    let queue = OutputQueue::shared(capacity);
    let settings = AdapterSettings {
        quote_interval: Duration::from_millis(100),
        tick_interval: Duration::from_millis(100),
        ..AdapterSettings::default()
    };
    let adapter = MarketDataAdapter::new(Arc::new(feed.clone()), settings, Arc::clone(&queue));
    (adapter, queue)
}

async fn ready_adapter(feed: &MockFeed) -> (MarketDataAdapter, Arc<OutputQueue>) {
    let (mut adapter, queue) = adapter_for(feed, 256);
    adapter.connect().await.unwrap();
    adapter
        .define_default_contracts(["AAPL", "MSFT"])
        .await
        .unwrap();
    (adapter, queue)
}

// =============================================================================
// Connection
// =============================================================================

#[tokio::test(start_paused = true)]
async fn retry_connects_after_transient_failures() {
    let feed = MockFeed::new();
    feed.fail_connects(2);
    let (mut adapter, _queue) = adapter_for(&feed, 16);

    let policy = ReconnectPolicy::new(
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_attempts: 5,
            ..ReconnectConfig::default()
        }
        .without_jitter(),
    );
    adapter.connect_with_retry(policy).await.unwrap();

    assert!(adapter.is_connected());
    assert!(adapter.status().is_connected());
    let connects = feed
        .calls()
        .iter()
        .filter(|c| **c == FeedCall::Connect)
        .count();
    assert_eq!(connects, 3);
}

#[tokio::test(start_paused = true)]
async fn connection_timeout_is_reported() {
    let feed = MockFeed::new();
    feed.delay_connect(Duration::from_secs(120));
    let (mut adapter, _queue) = adapter_for(&feed, 16);

    let err = adapter.connect().await.unwrap_err();
    assert!(matches!(err, IngestError::Connection(_)), "{err:?}");
    assert!(!adapter.is_connected());
}

#[tokio::test]
async fn operations_need_a_connection_and_a_contract() {
    let feed = MockFeed::new();
    let (mut adapter, _queue) = adapter_for(&feed, 16);

    assert!(matches!(
        adapter.register_contract("AAPL", "SMART", "USD").await,
        Err(IngestError::NotConnected)
    ));

    adapter.connect().await.unwrap();
    assert!(matches!(
        adapter.subscribe_quotes("TSLA").await,
        Err(IngestError::UnknownSymbol(symbol)) if symbol == "TSLA"
    ));
    assert!(matches!(
        adapter.register_contract("", "SMART", "USD").await,
        Err(IngestError::InvalidSymbol(_))
    ));
    assert!(adapter.active_subscriptions().is_empty());
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn repeated_subscribe_keeps_one_monitor() {
    let feed = MockFeed::new();
    let (mut adapter, _queue) = ready_adapter(&feed).await;

    let first = adapter.subscribe_quotes("AAPL").await.unwrap();
    let second = adapter.subscribe_quotes("AAPL").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(adapter.active_subscriptions().len(), 1);
    assert_eq!(adapter.running_monitors(), 1);
    assert_eq!(feed.open_handles(), 1);
    let market_data_requests = feed
        .calls()
        .iter()
        .filter(|c| matches!(c, FeedCall::MarketData(..)))
        .count();
    assert_eq!(market_data_requests, 1);

    adapter.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn depth_resubscribe_with_new_rows_replaces_the_entry() {
    let feed = MockFeed::new();
    let (mut adapter, _queue) = ready_adapter(&feed).await;

    let first = adapter.subscribe_depth("AAPL", 5).await.unwrap();
    let second = adapter.subscribe_depth("AAPL", 10).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.params, StreamParams::Depth { rows: 10 });
    assert_eq!(adapter.active_subscriptions().len(), 1);
    assert_eq!(feed.open_handles(), 1);
    assert!(feed.calls().contains(&FeedCall::Cancel(first.feed_handle)));

    adapter.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn smart_depth_falls_back_to_standard_depth() {
    let feed = MockFeed::new();
    feed.without_smart_depth("MSFT");
    let (mut adapter, _queue) = ready_adapter(&feed).await;

    let info = adapter.subscribe_smart_depth("MSFT", 10).await.unwrap();

    assert_eq!(info.key, SubscriptionKey::new("MSFT", StreamKind::SmartDepth));
    assert_eq!(info.depth_mode, Some(DepthMode::Standard));
    let depth_calls: Vec<_> = feed
        .calls()
        .into_iter()
        .filter(|c| matches!(c, FeedCall::MarketDepth { .. }))
        .collect();
    assert_eq!(
        depth_calls,
        vec![
            FeedCall::MarketDepth {
                symbol: "MSFT".to_string(),
                rows: 10,
                smart: true,
            },
            FeedCall::MarketDepth {
                symbol: "MSFT".to_string(),
                rows: 10,
                smart: false,
            },
        ]
    );

    // AAPL still gets the smart ladder.
    let aapl = adapter.subscribe_smart_depth("AAPL", 10).await.unwrap();
    assert_eq!(aapl.depth_mode, Some(DepthMode::Smart));

    adapter.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_monitor_before_releasing_handle() {
    let feed = MockFeed::new();
    let (mut adapter, _queue) = ready_adapter(&feed).await;
    let info = adapter.subscribe_trades("AAPL", TickKind::Last).await.unwrap();

    assert!(adapter.cancel(&info.key).await.unwrap());
    assert!(!adapter.cancel(&info.key).await.unwrap());

    assert_eq!(adapter.running_monitors(), 0);
    assert_eq!(feed.open_handles(), 0);
    assert_eq!(feed.calls().last(), Some(&FeedCall::Cancel(info.feed_handle)));

    adapter.disconnect().await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn disconnect_releases_every_subscription_first() {
    let feed = MockFeed::new();
    let (mut adapter, _queue) = ready_adapter(&feed).await;
    for symbol in ["AAPL", "MSFT"] {
        adapter.subscribe_quotes(symbol).await.unwrap();
        adapter.subscribe_trades(symbol, TickKind::Last).await.unwrap();
        adapter.subscribe_depth(symbol, 5).await.unwrap();
    }
    assert_eq!(feed.open_handles(), 6);

    let report = adapter.disconnect().await;

    assert!(report.is_clean());
    assert_eq!(report.cancelled, 6);
    assert_eq!(feed.open_handles_at_disconnect(), Some(0));
    assert_eq!(feed.calls().last(), Some(&FeedCall::Disconnect));
    assert!(!adapter.is_connected());
    assert!(adapter.active_subscriptions().is_empty());
    assert_eq!(adapter.running_monitors(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_release_does_not_block_teardown() {
    let feed = MockFeed::new();
    feed.fail_cancels_for("MSFT");
    let (mut adapter, _queue) = ready_adapter(&feed).await;
    adapter.subscribe_quotes("AAPL").await.unwrap();
    adapter.subscribe_quotes("MSFT").await.unwrap();

    let report = adapter.disconnect().await;

    assert_eq!(report.cancelled, 2);
    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0.symbol, "MSFT");
    assert_eq!(feed.calls().last(), Some(&FeedCall::Disconnect));
}

#[tokio::test(start_paused = true)]
async fn contracts_survive_a_reconnect() {
    let feed = MockFeed::new();
    let (mut adapter, _queue) = ready_adapter(&feed).await;
    adapter.disconnect().await;

    adapter.connect().await.unwrap();
    let info = adapter.subscribe_quotes("AAPL").await.unwrap();
    assert_eq!(info.key.symbol, "AAPL");
    assert!(adapter.contract_for("aapl").is_some());

    adapter.disconnect().await;
}

// =============================================================================
// End to end
// =============================================================================

#[tokio::test(start_paused = true)]
async fn quotes_reach_the_sink_through_the_drain() {
    let feed = MockFeed::new();
    let (mut adapter, queue) = ready_adapter(&feed).await;
    let sink = MemorySink::new();
    let drain = QueueDrain::new(
        Arc::clone(&queue),
        Arc::new(sink.clone()),
        10,
        Duration::from_millis(200),
    );
    let drain_cancel = CancellationToken::new();
    let drain_task = tokio::spawn(drain.run(drain_cancel.clone()));

    feed.quote("AAPL").set(RawQuote {
        bid: 10.0,
        ask: 10.1,
        ..RawQuote::unknown()
    });
    adapter.subscribe_quotes("AAPL").await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    feed.quote("AAPL").update(|q| q.ask = 10.2);
    tokio::time::sleep(Duration::from_millis(500)).await;

    adapter.disconnect().await;
    drain_cancel.cancel();
    let stats = drain_task.await.unwrap();

    assert_eq!(stats.events_written, 2);
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type() == "top_of_book"));
}

#[tokio::test]
async fn json_lines_sink_receives_tagged_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let feed = MockFeed::new();
    feed.set_fundamentals("AAPL", "FinRatios", "<ratios/>");
    let (mut adapter, queue) = ready_adapter(&feed).await;
    adapter.request_fundamental_ratios("AAPL").await.unwrap();

    let sink = JsonLinesSink::open(&path).await.unwrap();
    let drain = QueueDrain::new(Arc::clone(&queue), Arc::new(sink), 10, Duration::from_secs(1));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = drain.run(cancel).await;
    assert_eq!(stats.events_written, 1);

    let contents = tokio::fs::read_to_string(&path).await.unwrap();
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 1);
    let json: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(json["event_type"], "fundamental_data");
    assert_eq!(json["symbol"], "AAPL");
    assert_eq!(json["report_kind"], "FinRatios");

    let event: MarketDataEvent = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(event.symbol(), "AAPL");

    adapter.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn simulated_feed_produces_every_stream() {
    let feed = SimulatedFeed::new(SimulationConfig {
        seed: Some(7),
        ..SimulationConfig::default()
    });
    let queue = OutputQueue::shared(10_000);
    let mut adapter = MarketDataAdapter::new(
        Arc::new(feed),
        AdapterSettings::default(),
        Arc::clone(&queue),
    );
    adapter.connect().await.unwrap();
    adapter.define_default_contracts(["SPY"]).await.unwrap();
    adapter.subscribe_quotes("SPY").await.unwrap();
    adapter.subscribe_trades("SPY", TickKind::Last).await.unwrap();
    let depth = adapter.subscribe_smart_depth("SPY", 5).await.unwrap();
    assert_eq!(depth.depth_mode, Some(DepthMode::Standard));

    tokio::time::sleep(Duration::from_secs(2)).await;
    let report = adapter.disconnect().await;
    assert!(report.is_clean());
    assert_eq!(report.cancelled, 3);

    let kinds: std::collections::BTreeSet<_> = std::iter::from_fn(|| queue.try_get())
        .map(|event| event.event_type())
        .collect();
    assert!(kinds.contains("top_of_book"));
    assert!(kinds.contains("tick_by_tick"));
    assert!(kinds.contains("market_depth"));
}
