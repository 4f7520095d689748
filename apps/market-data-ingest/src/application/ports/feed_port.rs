//! Feed Port (Driven Port)
//!
//! Capability interface of the upstream broker feed. The broker wire
//! protocol lives behind these traits; the ingestion core only needs to
//! connect, define contracts, open the three stream shapes, cancel them
//! and issue the two request/response calls.
//!
//! Stream shapes:
//!
//! - [`QuoteSource`]: current top-of-book state, sampled by polling.
//! - [`TickSource`]: an append-only list of ticks that grows over time.
//! - [`DepthFeed`]: a channel the feed pushes a full ladder into on every
//!   book change.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::instrument::{Contract, ContractSpec};
use crate::domain::streaming::TickKind;

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// Connecting to the feed failed or timed out.
    #[error("feed connection failed: {0}")]
    ConnectionFailed(String),

    /// A single read returned malformed or momentarily unavailable data.
    #[error("transient read error: {0}")]
    TransientRead(String),

    /// The feed does not support the requested capability for this contract.
    #[error("capability {capability} unavailable for {symbol}: {reason}")]
    CapabilityUnavailable {
        /// Capability name.
        capability: &'static str,
        /// Contract symbol.
        symbol: String,
        /// Feed-provided reason.
        reason: String,
    },

    /// A request was rejected by the feed.
    #[error("feed request failed: {0}")]
    RequestFailed(String),

    /// The handle does not refer to an open feed subscription.
    #[error("unknown feed handle {0}")]
    UnknownHandle(FeedHandle),

    /// The session is no longer connected.
    #[error("feed session disconnected")]
    Disconnected,
}

// =============================================================================
// Connection
// =============================================================================

/// Upstream connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Feed host.
    pub host: String,
    /// Feed port.
    pub port: u16,
    /// Client id presented to the feed.
    pub client_id: i32,
    /// Connect timeout.
    pub timeout: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
            timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Display for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (client {})", self.host, self.port, self.client_id)
    }
}

/// Identifier of one open feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedHandle(pub u64);

impl fmt::Display for FeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// Raw Feed Shapes
// =============================================================================

/// Raw top-of-book state; `NaN` marks an unknown value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawQuote {
    /// Best bid.
    pub bid: f64,
    /// Best ask.
    pub ask: f64,
    /// Last trade price.
    pub last: f64,
    /// Session volume.
    pub volume: f64,
    /// Time of the last update.
    pub time: Option<DateTime<Utc>>,
}

impl RawQuote {
    /// A quote with every field unknown.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            bid: f64::NAN,
            ask: f64::NAN,
            last: f64::NAN,
            volume: f64::NAN,
            time: None,
        }
    }
}

/// Raw tick-by-tick entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTick {
    /// Exchange time.
    pub time: Option<DateTime<Utc>>,
    /// Price (`NaN` when not reported).
    pub price: f64,
    /// Size (`NaN` when not reported).
    pub size: f64,
    /// Tick attributes (e.g. `past_limit`, `unreported`).
    pub attributes: BTreeMap<String, bool>,
}

impl RawTick {
    /// Convenience constructor without attributes.
    #[must_use]
    pub const fn new(time: Option<DateTime<Utc>>, price: f64, size: f64) -> Self {
        Self {
            time,
            price,
            size,
            attributes: BTreeMap::new(),
        }
    }
}

/// Entries `[from, len)` of a tick list, read atomically with `len`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickWindow {
    /// Current length of the list.
    pub len: usize,
    /// Entries from the requested index to the end (empty if `len <= from`).
    pub ticks: Vec<RawTick>,
}

/// One raw price level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLevel {
    /// Level price.
    pub price: f64,
    /// Level size.
    pub size: f64,
}

impl RawLevel {
    /// Create a level.
    #[must_use]
    pub const fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Full current ladder of both book sides, best level first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthBook {
    /// Bid ladder.
    pub bids: Vec<RawLevel>,
    /// Ask ladder.
    pub asks: Vec<RawLevel>,
}

/// Raw historical bar.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    /// Bar open time.
    pub date: DateTime<Utc>,
    /// Open.
    pub open: f64,
    /// High.
    pub high: f64,
    /// Low.
    pub low: f64,
    /// Close.
    pub close: f64,
    /// Volume.
    pub volume: f64,
    /// Trade count.
    pub bar_count: Option<i64>,
    /// VWAP.
    pub average: Option<f64>,
}

/// Historical data request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalRequest {
    /// Lookback duration (e.g. `1 D`).
    pub duration: String,
    /// Bar size (e.g. `1 min`).
    pub bar_size: String,
    /// Data type to aggregate (`TRADES`, `MIDPOINT`, ...).
    pub what_to_show: String,
    /// Restrict to regular trading hours.
    pub regular_hours_only: bool,
}

impl HistoricalRequest {
    /// Request `TRADES` bars inside regular hours.
    #[must_use]
    pub fn new(duration: impl Into<String>, bar_size: impl Into<String>) -> Self {
        Self {
            duration: duration.into(),
            bar_size: bar_size.into(),
            what_to_show: "TRADES".to_string(),
            regular_hours_only: true,
        }
    }

    /// Override the data type.
    #[must_use]
    pub fn what_to_show(mut self, what: impl Into<String>) -> Self {
        self.what_to_show = what.into();
        self
    }

    /// Include data outside regular trading hours.
    #[must_use]
    pub const fn include_extended_hours(mut self) -> Self {
        self.regular_hours_only = false;
        self
    }
}

impl Default for HistoricalRequest {
    fn default() -> Self {
        Self::new("1 D", "1 min")
    }
}

// =============================================================================
// Stream Handles
// =============================================================================

/// Polled top-of-book state of one market data subscription.
pub trait QuoteSource: Send + Sync {
    /// Feed handle backing this source.
    fn handle(&self) -> FeedHandle;

    /// Read the current state.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::TransientRead`] when the state cannot be read
    /// right now.
    fn read(&self) -> Result<RawQuote, FeedError>;
}

/// Append-only tick list of one tick-by-tick subscription.
pub trait TickSource: Send + Sync {
    /// Feed handle backing this source.
    fn handle(&self) -> FeedHandle;

    /// Read the list length and every entry from index `from` onwards in
    /// one consistent step.
    fn read_from(&self, from: usize) -> TickWindow;
}

/// Depth subscription: the feed pushes the full ladder on every change.
#[derive(Debug)]
pub struct DepthFeed {
    /// Feed handle backing this subscription.
    pub handle: FeedHandle,
    /// Full-ladder updates.
    pub updates: mpsc::Receiver<DepthBook>,
}

// =============================================================================
// Ports
// =============================================================================

/// Opens sessions to the upstream feed.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Establish a session.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::ConnectionFailed`] when the feed is unreachable.
    async fn connect(&self, params: &ConnectionParams) -> Result<Arc<dyn FeedSession>, FeedError>;
}

/// One live upstream connection.
#[async_trait]
pub trait FeedSession: Send + Sync {
    /// Resolve a contract spec into a tradable instrument.
    async fn define_contract(&self, spec: &ContractSpec) -> Result<Contract, FeedError>;

    /// Open a streaming top-of-book subscription.
    async fn request_market_data(
        &self,
        contract: &Contract,
    ) -> Result<Arc<dyn QuoteSource>, FeedError>;

    /// Open a tick-by-tick subscription.
    async fn request_tick_by_tick(
        &self,
        contract: &Contract,
        kind: TickKind,
    ) -> Result<Arc<dyn TickSource>, FeedError>;

    /// Open a depth subscription of `rows` levels per side.
    ///
    /// With `smart` set, the feed returns
    /// [`FeedError::CapabilityUnavailable`] if it cannot serve smart depth.
    async fn request_market_depth(
        &self,
        contract: &Contract,
        rows: usize,
        smart: bool,
    ) -> Result<DepthFeed, FeedError>;

    /// Release a subscription opened by one of the `request_*` calls.
    async fn cancel(&self, handle: FeedHandle) -> Result<(), FeedError>;

    /// Fetch historical bars in chronological order.
    async fn request_historical_bars(
        &self,
        contract: &Contract,
        request: &HistoricalRequest,
    ) -> Result<Vec<RawBar>, FeedError>;

    /// Fetch a fundamental report payload.
    async fn request_fundamentals(
        &self,
        contract: &Contract,
        report_kind: &str,
    ) -> Result<String, FeedError>;

    /// Close the connection.
    async fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_defaults() {
        let params = ConnectionParams::default();
        assert_eq!(params.host, "127.0.0.1");
        assert_eq!(params.port, 7497);
        assert_eq!(params.client_id, 1);
        assert_eq!(params.timeout, Duration::from_secs(10));
        assert_eq!(params.to_string(), "127.0.0.1:7497 (client 1)");
    }

    #[test]
    fn historical_request_builder() {
        let request = HistoricalRequest::new("2 D", "5 mins")
            .what_to_show("MIDPOINT")
            .include_extended_hours();
        assert_eq!(request.duration, "2 D");
        assert_eq!(request.bar_size, "5 mins");
        assert_eq!(request.what_to_show, "MIDPOINT");
        assert!(!request.regular_hours_only);

        let default = HistoricalRequest::default();
        assert_eq!(default.what_to_show, "TRADES");
        assert!(default.regular_hours_only);
    }

    #[test]
    fn raw_quote_unknown_is_all_nan() {
        let quote = RawQuote::unknown();
        assert!(quote.bid.is_nan() && quote.ask.is_nan() && quote.last.is_nan());
        assert!(quote.time.is_none());
    }
}
