//! Market Data Ingest Binary
//!
//! Starts the ingestion service against the feed connector named by
//! `INGEST_FEED`. The only connector built into this binary is the
//! simulated feed. It receives the endpoint settings on connect but only
//! logs them, so `INGEST_FEED_HOST`, `INGEST_FEED_PORT` and
//! `INGEST_CLIENT_ID` do not reach any network peer.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-ingest
//! ```
//!
//! # Environment Variables
//!
//! - `INGEST_FEED`: Feed connector (default: simulated; other values are rejected)
//! - `INGEST_SYMBOLS`: Comma-separated symbols (default: AAPL,MSFT)
//! - `INGEST_FEED_HOST` / `INGEST_FEED_PORT` / `INGEST_CLIENT_ID`: Endpoint handed to the connector
//! - `INGEST_QUEUE_CAPACITY`: Output queue bound (default: 10000)
//! - `INGEST_SINK_PATH`: JSON-lines output file (default: log sink)
//! - `INGEST_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-data-ingest)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_data_ingest::application::ports::{FeedConnector, HistoricalRequest, MarketDataSink};
use market_data_ingest::application::services::{AdapterSettings, MarketDataAdapter, QueueDrain};
use market_data_ingest::infrastructure::config::FeedKind;
use market_data_ingest::infrastructure::feed::{SimulatedFeed, SimulationConfig};
use market_data_ingest::infrastructure::health::{HealthServer, HealthServerState};
use market_data_ingest::infrastructure::queue::OutputQueue;
use market_data_ingest::infrastructure::reconnect::{ReconnectConfig, ReconnectPolicy};
use market_data_ingest::infrastructure::sink::{JsonLinesSink, LogSink};
use market_data_ingest::infrastructure::telemetry;
use market_data_ingest::{IngestConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Time allowed for the drain to empty the queue on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting market data ingest");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = IngestConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let queue = OutputQueue::shared(config.drain.queue_capacity);

    // Downstream drain
    let sink: Arc<dyn MarketDataSink> = match &config.drain.sink_path {
        Some(path) => Arc::new(
            JsonLinesSink::open(path)
                .await
                .with_context(|| format!("failed to open sink file {}", path.display()))?,
        ),
        None => Arc::new(LogSink),
    };
    let drain_token = CancellationToken::new();
    let drain = QueueDrain::from_settings(Arc::clone(&queue), sink, &config.drain);
    let drain_task = tokio::spawn(drain.run(drain_token.clone()));

    // Orchestrator
    let feed: Arc<dyn FeedConnector> = match config.feed.kind {
        FeedKind::Simulated => Arc::new(SimulatedFeed::new(SimulationConfig::default())),
    };
    let mut adapter = MarketDataAdapter::new(
        feed,
        AdapterSettings::from_config(&config),
        Arc::clone(&queue),
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        adapter.status(),
        Arc::clone(&queue),
    ));
    let health_server = HealthServer::new(config.health_port, health_state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    adapter
        .connect_with_retry(ReconnectPolicy::new(ReconnectConfig::from_config(&config)))
        .await
        .context("failed to connect to feed")?;

    adapter
        .define_contracts(
            &config.streams.symbols,
            &config.streams.exchange,
            &config.streams.currency,
        )
        .await
        .context("failed to define contracts")?;

    subscribe_all(&mut adapter, &config).await;
    request_startup_data(&adapter, &config).await;

    tracing::info!(
        subscriptions = adapter.active_subscriptions().len(),
        "Market data ingest ready"
    );

    await_shutdown(shutdown_token).await;

    let report = adapter.disconnect().await;
    tracing::info!(
        cancelled = report.cancelled,
        failures = report.failures.len(),
        "Subscriptions released"
    );

    drain_token.cancel();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, drain_task).await {
        Ok(Ok(stats)) => tracing::info!(
            events = stats.events_written,
            dropped = stats.events_dropped,
            "Queue drained"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Drain task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Queue drain timed out"
        ),
    }

    tracing::info!("Market data ingest stopped");
    drop(telemetry_guard);
    Ok(())
}

/// Open every configured stream for every symbol.
async fn subscribe_all(adapter: &mut MarketDataAdapter, config: &IngestConfig) {
    let streams = &config.streams;
    for symbol in &streams.symbols {
        if let Err(e) = adapter.subscribe_quotes(symbol).await {
            tracing::error!(symbol = %symbol, error = %e, "Quote subscription failed");
        }
        if let Err(e) = adapter.subscribe_trades(symbol, streams.tick_kind).await {
            tracing::error!(symbol = %symbol, error = %e, "Trade subscription failed");
        }
        let depth = if streams.smart_depth {
            adapter
                .subscribe_smart_depth(symbol, streams.smart_depth_rows)
                .await
        } else {
            adapter.subscribe_depth(symbol, streams.depth_rows).await
        };
        if let Err(e) = depth {
            tracing::error!(symbol = %symbol, error = %e, "Depth subscription failed");
        }
    }
}

/// Issue the one-shot historical and fundamentals requests.
async fn request_startup_data(adapter: &MarketDataAdapter, config: &IngestConfig) {
    let request = HistoricalRequest::new(
        config.requests.history_duration.clone(),
        config.requests.history_bar_size.clone(),
    );
    for symbol in &config.streams.symbols {
        match adapter.request_historical_with(symbol, &request).await {
            Ok(bars) => tracing::info!(symbol = %symbol, bars, "Historical bars queued"),
            Err(e) => tracing::warn!(symbol = %symbol, error = %e, "Historical request failed"),
        }
        if let Err(e) = adapter
            .request_fundamentals(symbol, &config.requests.fundamental_report)
            .await
        {
            tracing::warn!(symbol = %symbol, error = %e, "Fundamentals request failed");
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        feed = %config.feed.kind,
        endpoint = %config.feed.connection_params(),
        symbols = ?config.streams.symbols,
        queue_capacity = config.drain.queue_capacity,
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        quote_interval_ms = u64::try_from(config.streams.quote_interval.as_millis()).unwrap_or(u64::MAX),
        tick_interval_ms = u64::try_from(config.streams.tick_interval.as_millis()).unwrap_or(u64::MAX),
        batch_size = config.drain.batch_size,
        "Stream settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
