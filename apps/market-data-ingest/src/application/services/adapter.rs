//! Market Data Adapter (Orchestrator)
//!
//! Owns the upstream connection lifecycle, the contract registry and the
//! subscription registry, and wires feed handles to monitors and monitors
//! to the output queue.
//!
//! Every mutating operation takes `&mut self`; the adapter is driven by a
//! single owner. Observers read [`AdapterStatus`], which is shared.
//!
//! Teardown order on [`MarketDataAdapter::disconnect`]:
//!
//! 1. Signal every monitor and wait for all of them to finish.
//! 2. Release every feed handle.
//! 3. Close the session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::registry::{Subscription, SubscriptionInfo, SubscriptionRegistry, TeardownReport};
use crate::application::monitors::{
    DEFAULT_QUOTE_INTERVAL, DEFAULT_TICK_INTERVAL, DepthMonitor, MonitorCounters, QuoteMonitor,
    TickMonitor,
};
use crate::application::ports::{
    ConnectionParams, FeedConnector, FeedError, FeedSession, HistoricalRequest,
};
use crate::domain::instrument::{
    Contract, ContractSpec, DEFAULT_CURRENCY, DEFAULT_EXCHANGE, Symbol, normalize_symbol,
};
use crate::domain::streaming::{
    EventError, FundamentalReport, HistoricalBar, HistoricalBarBatch, MarketDataEvent, TickKind,
};
use crate::domain::subscription::{DepthMode, StreamKind, StreamParams, SubscriptionKey};
use crate::infrastructure::config::IngestConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::queue::{OutputQueue, QueueClosed};
use crate::infrastructure::reconnect::ReconnectPolicy;

/// Report kind requested by [`MarketDataAdapter::request_fundamental_ratios`].
pub const FUNDAMENTAL_RATIOS_REPORT: &str = "FinRatios";

// =============================================================================
// Errors
// =============================================================================

/// Connecting to the upstream feed failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection to {endpoint} failed after {attempts} attempt(s): {reason}")]
pub struct ConnectionError {
    /// Endpoint description.
    pub endpoint: String,
    /// Cause of the last failure.
    pub reason: String,
    /// Attempts made.
    pub attempts: u32,
}

/// Errors surfaced to callers of the adapter.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Connecting failed or timed out.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// No contract is registered for the symbol.
    #[error("symbol {0} has no registered contract")]
    UnknownSymbol(Symbol),

    /// The symbol failed validation.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] EventError),

    /// The operation needs a live session.
    #[error("not connected to the feed")]
    NotConnected,

    /// The feed rejected a request.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// The output queue was closed.
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

// =============================================================================
// Settings & Status
// =============================================================================

/// Adapter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSettings {
    /// Upstream connection.
    pub connection: ConnectionParams,
    /// Quote sampling interval.
    pub quote_interval: Duration,
    /// Tick list poll interval.
    pub tick_interval: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionParams::default(),
            quote_interval: DEFAULT_QUOTE_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl AdapterSettings {
    /// Build from service configuration.
    #[must_use]
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            connection: config.feed.connection_params(),
            quote_interval: config.streams.quote_interval,
            tick_interval: config.streams.tick_interval,
        }
    }
}

/// Shared, lock-free view of the adapter state.
#[derive(Debug, Clone, Default)]
pub struct AdapterStatus {
    inner: Arc<StatusCells>,
}

#[derive(Debug, Default)]
struct StatusCells {
    connected: AtomicBool,
    subscriptions: AtomicUsize,
    contracts: AtomicUsize,
}

/// Point-in-time copy of [`AdapterStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Whether a session is open.
    pub connected: bool,
    /// Registry entries.
    pub active_subscriptions: usize,
    /// Registered contracts.
    pub registered_contracts: usize,
}

impl AdapterStatus {
    /// Whether a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Snapshot every value.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.is_connected(),
            active_subscriptions: self.inner.subscriptions.load(Ordering::Relaxed),
            registered_contracts: self.inner.contracts.load(Ordering::Relaxed),
        }
    }

    fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::Relaxed);
        metrics::set_feed_connected(connected);
    }

    fn set_subscriptions(&self, count: usize) {
        self.inner.subscriptions.store(count, Ordering::Relaxed);
    }

    fn set_contracts(&self, count: usize) {
        self.inner.contracts.store(count, Ordering::Relaxed);
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Connects to the feed, opens subscriptions and feeds the output queue.
pub struct MarketDataAdapter {
    connector: Arc<dyn FeedConnector>,
    settings: AdapterSettings,
    session: Option<Arc<dyn FeedSession>>,
    contracts: HashMap<Symbol, Contract>,
    registry: SubscriptionRegistry,
    queue: Arc<OutputQueue>,
    status: AdapterStatus,
}

impl MarketDataAdapter {
    /// Create a disconnected adapter writing to `queue`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn FeedConnector>,
        settings: AdapterSettings,
        queue: Arc<OutputQueue>,
    ) -> Self {
        Self {
            connector,
            settings,
            session: None,
            contracts: HashMap::new(),
            registry: SubscriptionRegistry::new(),
            queue,
            status: AdapterStatus::default(),
        }
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    /// Open the upstream session. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Connection`] when the feed refuses the
    /// connection or does not answer within the configured timeout.
    pub async fn connect(&mut self) -> Result<(), IngestError> {
        if self.session.is_some() {
            debug!("Already connected");
            return Ok(());
        }

        let params = &self.settings.connection;
        info!(endpoint = %params, "Connecting to feed");

        let reason = match tokio::time::timeout(params.timeout, self.connector.connect(params)).await
        {
            Ok(Ok(session)) => {
                metrics::record_connect_attempt(true);
                self.session = Some(session);
                self.status.set_connected(true);
                info!(endpoint = %params, "Connected to feed");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {}ms", params.timeout.as_millis()),
        };

        metrics::record_connect_attempt(false);
        Err(ConnectionError {
            endpoint: params.to_string(),
            reason,
            attempts: 1,
        }
        .into())
    }

    /// Connect, retrying with backoff until `policy` gives up.
    ///
    /// # Errors
    ///
    /// Returns the last [`ConnectionError`] once the policy is exhausted.
    pub async fn connect_with_retry(&mut self, mut policy: ReconnectPolicy) -> Result<(), IngestError> {
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(IngestError::Connection(mut failure)) => {
                    failure.attempts = policy.attempt_count();
                    let Some(delay) = policy.next_delay() else {
                        error!(error = %failure, "Giving up on feed connection");
                        return Err(failure.into());
                    };
                    warn!(
                        attempt = failure.attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %failure.reason,
                        "Feed connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Cancel every subscription, then close the session.
    ///
    /// Registered contracts are kept for the next session. A no-op when not
    /// connected.
    pub async fn disconnect(&mut self) -> TeardownReport {
        let Some(session) = self.session.take() else {
            return TeardownReport::default();
        };

        let report = self.registry.cancel_all(session.as_ref()).await;
        self.status.set_subscriptions(self.registry.len());
        if !report.is_clean() {
            warn!(failures = report.failures.len(), "Some feed handles were not released");
        }

        session.disconnect().await;
        self.status.set_connected(false);
        info!(cancelled = report.cancelled, "Disconnected from feed");
        report
    }

    /// Whether a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    // -------------------------------------------------------------------------
    // Contracts
    // -------------------------------------------------------------------------

    /// Resolve and register the contract of one symbol.
    ///
    /// Registering a symbol again with the same exchange and currency returns
    /// the existing contract.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InvalidSymbol`], [`IngestError::NotConnected`]
    /// or the feed's rejection.
    pub async fn register_contract(
        &mut self,
        symbol: &str,
        exchange: &str,
        currency: &str,
    ) -> Result<Contract, IngestError> {
        let spec = ContractSpec::stock(normalize_symbol(symbol)?, exchange, currency);
        if let Some(existing) = self.contracts.get(&spec.symbol).filter(|c| c.spec == spec) {
            return Ok(existing.clone());
        }

        let session = self.session()?;
        let contract = session.define_contract(&spec).await?;
        info!(contract = %contract, "Contract registered");

        self.contracts.insert(spec.symbol, contract.clone());
        self.status.set_contracts(self.contracts.len());
        Ok(contract)
    }

    /// Register many symbols on one exchange and currency.
    ///
    /// Every symbol is validated before any contract is requested.
    ///
    /// # Errors
    ///
    /// Returns the first validation or feed error.
    pub async fn define_contracts<I, S>(
        &mut self,
        symbols: I,
        exchange: &str,
        currency: &str,
    ) -> Result<Vec<Contract>, IngestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let symbols = symbols
            .into_iter()
            .map(|s| normalize_symbol(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut contracts = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            contracts.push(self.register_contract(symbol, exchange, currency).await?);
        }
        Ok(contracts)
    }

    /// [`Self::define_contracts`] on the default exchange and currency.
    ///
    /// # Errors
    ///
    /// See [`Self::define_contracts`].
    pub async fn define_default_contracts<I, S>(&mut self, symbols: I) -> Result<Vec<Contract>, IngestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.define_contracts(symbols, DEFAULT_EXCHANGE, DEFAULT_CURRENCY)
            .await
    }

    /// Registered contract of a symbol.
    #[must_use]
    pub fn contract_for(&self, symbol: &str) -> Option<&Contract> {
        normalize_symbol(symbol)
            .ok()
            .and_then(|s| self.contracts.get(&s))
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Sample top-of-book state and emit changed snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::UnknownSymbol`] without a registered contract,
    /// [`IngestError::NotConnected`] or the feed's rejection.
    pub async fn subscribe_quotes(&mut self, symbol: &str) -> Result<SubscriptionInfo, IngestError> {
        let contract = self.registered(symbol)?;
        let session = self.session()?;
        let key = SubscriptionKey::new(contract.symbol(), StreamKind::Quotes);
        if let Some(existing) = self.reuse_or_release(&key, StreamParams::None, &session).await {
            return Ok(existing);
        }

        let source = session.request_market_data(&contract).await?;
        let handle = source.handle();
        let counters = MonitorCounters::new();
        let monitor = QuoteMonitor::new(
            key.symbol.clone(),
            source,
            self.queue.producer(),
            self.settings.quote_interval,
            counters.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            monitor
                .run(cancel.clone())
                .instrument(info_span!("quote_monitor", symbol = %key.symbol)),
        );
        Ok(self.record(Subscription::new(key, StreamParams::None, handle, None, counters, cancel, task)))
    }

    /// Follow the tick-by-tick list of one tick kind.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe_quotes`].
    pub async fn subscribe_trades(
        &mut self,
        symbol: &str,
        kind: TickKind,
    ) -> Result<SubscriptionInfo, IngestError> {
        let contract = self.registered(symbol)?;
        let session = self.session()?;
        let key = SubscriptionKey::new(contract.symbol(), StreamKind::Trades(kind));
        if let Some(existing) = self.reuse_or_release(&key, StreamParams::None, &session).await {
            return Ok(existing);
        }

        let source = session.request_tick_by_tick(&contract, kind).await?;
        let handle = source.handle();
        let counters = MonitorCounters::new();
        let monitor = TickMonitor::new(
            key.symbol.clone(),
            kind,
            source,
            self.queue.producer(),
            self.settings.tick_interval,
            counters.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            monitor
                .run(cancel.clone())
                .instrument(info_span!("tick_monitor", symbol = %key.symbol, kind = %kind)),
        );
        Ok(self.record(Subscription::new(key, StreamParams::None, handle, None, counters, cancel, task)))
    }

    /// Standard market depth of `rows` levels per side.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe_quotes`].
    pub async fn subscribe_depth(
        &mut self,
        symbol: &str,
        rows: usize,
    ) -> Result<SubscriptionInfo, IngestError> {
        self.open_depth(symbol, rows, DepthMode::Standard).await
    }

    /// Smart (aggregated) depth of `rows` levels per side.
    ///
    /// Falls back to standard depth, under the same registry key, when the
    /// feed does not offer smart depth for the contract.
    ///
    /// # Errors
    ///
    /// See [`Self::subscribe_quotes`].
    pub async fn subscribe_smart_depth(
        &mut self,
        symbol: &str,
        rows: usize,
    ) -> Result<SubscriptionInfo, IngestError> {
        self.open_depth(symbol, rows, DepthMode::Smart).await
    }

    async fn open_depth(
        &mut self,
        symbol: &str,
        rows: usize,
        requested: DepthMode,
    ) -> Result<SubscriptionInfo, IngestError> {
        let contract = self.registered(symbol)?;
        let session = self.session()?;
        let kind = match requested {
            DepthMode::Standard => StreamKind::Depth,
            DepthMode::Smart => StreamKind::SmartDepth,
        };
        let key = SubscriptionKey::new(contract.symbol(), kind);
        let params = StreamParams::Depth { rows };
        if let Some(existing) = self.reuse_or_release(&key, params, &session).await {
            return Ok(existing);
        }

        let (feed, mode) = match requested {
            DepthMode::Standard => (
                session.request_market_depth(&contract, rows, false).await?,
                DepthMode::Standard,
            ),
            DepthMode::Smart => match session.request_market_depth(&contract, rows, true).await {
                Ok(feed) => (feed, DepthMode::Smart),
                Err(FeedError::CapabilityUnavailable { capability, reason, .. }) => {
                    warn!(
                        symbol = %key.symbol,
                        capability,
                        reason = %reason,
                        "Smart depth unavailable, falling back to standard depth"
                    );
                    metrics::record_capability_fallback(capability);
                    (
                        session.request_market_depth(&contract, rows, false).await?,
                        DepthMode::Standard,
                    )
                }
                Err(e) => return Err(e.into()),
            },
        };

        let handle = feed.handle;
        let counters = MonitorCounters::new();
        let monitor = DepthMonitor::new(
            key.symbol.clone(),
            handle,
            feed.updates,
            self.queue.producer(),
            counters.clone(),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            monitor
                .run(cancel.clone())
                .instrument(info_span!("depth_monitor", symbol = %key.symbol, ?mode)),
        );
        Ok(self.record(Subscription::new(key, params, handle, Some(mode), counters, cancel, task)))
    }

    /// Stop one subscription and release its feed handle.
    ///
    /// Returns `false` when no such subscription exists.
    ///
    /// # Errors
    ///
    /// Returns the feed error raised while releasing the handle; the entry
    /// is removed regardless.
    pub async fn cancel(&mut self, key: &SubscriptionKey) -> Result<bool, IngestError> {
        let Some(session) = self.session.clone() else {
            return Ok(false);
        };
        let result = self.registry.cancel(key, session.as_ref()).await;
        self.status.set_subscriptions(self.registry.len());
        result.map_err(IngestError::from)
    }

    /// Views of every active subscription, ordered by key.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.registry.snapshot()
    }

    /// View of one subscription.
    #[must_use]
    pub fn subscription(&self, key: &SubscriptionKey) -> Option<SubscriptionInfo> {
        self.registry.get(key).map(|s| s.info().clone())
    }

    /// Number of subscriptions whose monitor is still running.
    #[must_use]
    pub fn running_monitors(&self) -> usize {
        self.registry.running()
    }

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------

    /// Fetch `TRADES` bars inside regular hours and queue them as one batch.
    ///
    /// Returns the number of bars queued.
    ///
    /// # Errors
    ///
    /// See [`Self::request_historical_with`].
    pub async fn request_historical(
        &self,
        symbol: &str,
        duration: &str,
        bar_size: &str,
    ) -> Result<usize, IngestError> {
        self.request_historical_with(symbol, &HistoricalRequest::new(duration, bar_size))
            .await
    }

    /// Fetch historical bars and queue them as one batch.
    ///
    /// Bars that violate `high >= low`, `volume >= 0` or carry non-finite
    /// prices are dropped with a warning. Returns the number of bars queued.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::UnknownSymbol`], [`IngestError::NotConnected`],
    /// the feed's rejection or [`IngestError::QueueClosed`].
    pub async fn request_historical_with(
        &self,
        symbol: &str,
        request: &HistoricalRequest,
    ) -> Result<usize, IngestError> {
        let contract = self.registered(symbol)?;
        let session = self.session()?;
        let raw = session.request_historical_bars(&contract, request).await?;
        let received = raw.len();

        let bars: Vec<HistoricalBar> = raw
            .into_iter()
            .filter_map(|bar| {
                HistoricalBar::from_raw(
                    bar.date,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.bar_count,
                    bar.average,
                )
                .inspect_err(|e| {
                    warn!(symbol = %contract.symbol(), date = %bar.date, error = %e, "Dropping invalid bar");
                })
                .ok()
            })
            .collect();

        let queued = bars.len();
        debug!(symbol = %contract.symbol(), received, queued, "Historical bars received");
        self.queue
            .put(MarketDataEvent::HistoricalData(HistoricalBarBatch {
                symbol: contract.symbol().to_string(),
                duration: request.duration.clone(),
                bar_size: request.bar_size.clone(),
                bars,
            }))
            .await?;
        metrics::record_events_emitted("historical", 1);
        Ok(queued)
    }

    /// Fetch a fundamental report and queue it.
    ///
    /// # Errors
    ///
    /// See [`Self::request_historical_with`].
    pub async fn request_fundamentals(
        &self,
        symbol: &str,
        report_kind: &str,
    ) -> Result<(), IngestError> {
        let contract = self.registered(symbol)?;
        let session = self.session()?;
        let payload = session.request_fundamentals(&contract, report_kind).await?;
        debug!(symbol = %contract.symbol(), report_kind, bytes = payload.len(), "Fundamental report received");

        self.queue
            .put(MarketDataEvent::FundamentalData(FundamentalReport {
                symbol: contract.symbol().to_string(),
                report_kind: report_kind.to_string(),
                payload,
                timestamp: Utc::now(),
            }))
            .await?;
        metrics::record_events_emitted("fundamentals", 1);
        Ok(())
    }

    /// Fetch the financial ratios report.
    ///
    /// # Errors
    ///
    /// See [`Self::request_fundamentals`].
    pub async fn request_fundamental_ratios(&self, symbol: &str) -> Result<(), IngestError> {
        self.request_fundamentals(symbol, FUNDAMENTAL_RATIOS_REPORT)
            .await
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Events currently waiting in the output queue.
    #[must_use]
    pub fn current_queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Output queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// The output queue.
    #[must_use]
    pub fn queue(&self) -> Arc<OutputQueue> {
        Arc::clone(&self.queue)
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> AdapterStatus {
        self.status.clone()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn session(&self) -> Result<Arc<dyn FeedSession>, IngestError> {
        self.session.clone().ok_or(IngestError::NotConnected)
    }

    fn registered(&self, symbol: &str) -> Result<Contract, IngestError> {
        let symbol = normalize_symbol(symbol)?;
        self.contracts
            .get(&symbol)
            .cloned()
            .ok_or(IngestError::UnknownSymbol(symbol))
    }

    /// Return the live entry for `key` when it was opened with `params`;
    /// otherwise release whatever entry exists so a new one can take its
    /// place.
    async fn reuse_or_release(
        &mut self,
        key: &SubscriptionKey,
        params: StreamParams,
        session: &Arc<dyn FeedSession>,
    ) -> Option<SubscriptionInfo> {
        let existing = self.registry.get(key)?;
        if existing.info().params == params && existing.is_running() {
            debug!(subscription = %key, "Already subscribed");
            return Some(existing.info().clone());
        }

        info!(subscription = %key, "Replacing subscription");
        if let Err(e) = self.registry.cancel(key, session.as_ref()).await {
            warn!(subscription = %key, error = %e, "Failed to release replaced subscription");
        }
        self.status.set_subscriptions(self.registry.len());
        None
    }

    fn record(&mut self, subscription: Subscription) -> SubscriptionInfo {
        let info = subscription.info().clone();
        self.registry.insert(subscription);
        self.status.set_subscriptions(self.registry.len());
        info!(
            subscription = %info.key,
            handle = %info.feed_handle,
            depth_mode = ?info.depth_mode,
            "Subscribed"
        );
        info
    }
}
