//! Market Data Streaming Types
//!
//! Core domain types for market data: quote snapshots, trade ticks,
//! depth levels, historical bars and fundamental reports. These types are
//! feed-agnostic and represent the canonical internal representation of
//! market data. Every value is immutable once constructed; a change is
//! expressed by building a new value.
//!
//! Raw feeds report prices as `f64` with `NaN` (or a negative sentinel)
//! meaning "not available". [`price_or_unknown`] turns those into an
//! explicit `None` before anything reaches the event model.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::Symbol;

// =============================================================================
// Errors
// =============================================================================

/// Invariant violations raised while constructing events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Symbol was empty after trimming.
    #[error("symbol cannot be empty")]
    EmptySymbol,

    /// Symbol exceeded the maximum length.
    #[error("symbol {0:?} exceeds {max} characters", max = super::instrument::MAX_SYMBOL_LEN)]
    SymbolTooLong(String),

    /// A price that must be strictly positive was not.
    #[error("price must be positive, got {0}")]
    NonPositivePrice(Decimal),

    /// A size that must be strictly positive was not.
    #[error("size must be positive, got {0}")]
    NonPositiveSize(Decimal),

    /// Bar high was below bar low.
    #[error("bar high {high} is below low {low}")]
    InvertedBar {
        /// Reported high.
        high: Decimal,
        /// Reported low.
        low: Decimal,
    },

    /// Bar volume was negative.
    #[error("bar volume cannot be negative, got {0}")]
    NegativeVolume(Decimal),

    /// A mandatory numeric field was NaN or infinite.
    #[error("field {0} is not a finite number")]
    NonFiniteValue(&'static str),
}

// =============================================================================
// Normalization Helpers
// =============================================================================

/// Convert a raw feed price into an optional decimal.
///
/// `NaN`, infinities and negative values are feed sentinels for "unknown"
/// and map to `None`.
#[must_use]
pub fn price_or_unknown(raw: f64) -> Option<Decimal> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    Decimal::try_from(raw).ok()
}

/// Convert a mandatory raw value, failing on `NaN`/infinite input.
///
/// # Errors
///
/// Returns [`EventError::NonFiniteValue`] naming `field` when the value
/// cannot be represented.
pub fn require_finite(raw: f64, field: &'static str) -> Result<Decimal, EventError> {
    if !raw.is_finite() {
        return Err(EventError::NonFiniteValue(field));
    }
    Decimal::try_from(raw).map_err(|_| EventError::NonFiniteValue(field))
}

// =============================================================================
// Quote Snapshot
// =============================================================================

/// Point-in-time top-of-book state for one symbol.
///
/// Equality is field-wise, with `None` equal only to `None`; this is what
/// the change filter compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Best bid, if known.
    pub bid: Option<Decimal>,
    /// Best ask, if known.
    pub ask: Option<Decimal>,
    /// Last traded price, if known.
    pub last: Option<Decimal>,
    /// Cumulative session volume, if known.
    pub volume: Option<Decimal>,
    /// Feed timestamp of the underlying state, if reported.
    pub timestamp: Option<DateTime<Utc>>,
}

impl QuoteSnapshot {
    /// Build a snapshot from raw feed values, mapping sentinels to unknown.
    #[must_use]
    pub fn from_raw(
        symbol: Symbol,
        bid: f64,
        ask: f64,
        last: f64,
        volume: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            symbol,
            bid: price_or_unknown(bid),
            ask: price_or_unknown(ask),
            last: price_or_unknown(last),
            volume: price_or_unknown(volume),
            timestamp,
        }
    }

    /// Whether every price field is unknown.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bid.is_none() && self.ask.is_none() && self.last.is_none()
    }
}

// =============================================================================
// Trade Tick
// =============================================================================

/// Kind of tick-by-tick stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickKind {
    /// Last trade prints.
    Last,
    /// Bid updates.
    Bid,
    /// Ask updates.
    Ask,
    /// Midpoint updates.
    Midpoint,
}

impl TickKind {
    /// Parse a tick kind, accepting the broker spellings (`Last`, `BidAsk`...).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "last" | "alllast" => Some(Self::Last),
            "bid" => Some(Self::Bid),
            "ask" => Some(Self::Ask),
            "midpoint" | "mid" => Some(Self::Midpoint),
            _ => None,
        }
    }

    /// Lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Last => "last",
            Self::Bid => "bid",
            Self::Ask => "ask",
            Self::Midpoint => "midpoint",
        }
    }
}

impl fmt::Display for TickKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tick-by-tick entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Stream kind the tick came from.
    pub kind: TickKind,
    /// Exchange time of the tick.
    pub time: Option<DateTime<Utc>>,
    /// Tick price; strictly positive when present.
    pub price: Option<Decimal>,
    /// Tick size; strictly positive when present.
    pub size: Option<Decimal>,
    /// Opaque boolean attributes reported with the tick.
    pub attributes: BTreeMap<String, bool>,
}

impl TradeTick {
    /// Build a tick from raw feed values.
    ///
    /// `NaN` price or size means "not reported" and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::NonPositivePrice`] or
    /// [`EventError::NonPositiveSize`] for reported values that are zero or
    /// negative.
    pub fn from_raw(
        symbol: Symbol,
        kind: TickKind,
        time: Option<DateTime<Utc>>,
        price: f64,
        size: f64,
        attributes: BTreeMap<String, bool>,
    ) -> Result<Self, EventError> {
        let price = positive_or_unreported(price, EventError::NonPositivePrice)?;
        let size = positive_or_unreported(size, EventError::NonPositiveSize)?;

        Ok(Self {
            symbol,
            kind,
            time,
            price,
            size,
            attributes,
        })
    }
}

fn positive_or_unreported(
    raw: f64,
    err: fn(Decimal) -> EventError,
) -> Result<Option<Decimal>, EventError> {
    if !raw.is_finite() {
        return Ok(None);
    }
    let value = Decimal::try_from(raw).map_err(|_| EventError::NonFiniteValue("tick"))?;
    if value <= Decimal::ZERO {
        return Err(err(value));
    }
    Ok(Some(value))
}

// =============================================================================
// Depth Level
// =============================================================================

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    /// Bid side.
    Bid,
    /// Ask side.
    Ask,
}

impl BookSide {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

/// Depth row operation.
///
/// The depth monitor emits full-ladder snapshots and therefore only ever
/// produces [`DepthOperation::Update`]; the other variants exist because
/// the storage schema accepts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthOperation {
    /// New row inserted at `position`.
    Insert,
    /// Row at `position` replaced.
    Update,
    /// Row at `position` removed.
    Delete,
}

/// One priced level of one side of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// 0-based rank within the side (0 = best).
    pub position: usize,
    /// Book side.
    pub side: BookSide,
    /// Row operation.
    pub operation: DepthOperation,
    /// Level price.
    pub price: Decimal,
    /// Level size.
    pub size: Decimal,
    /// Ladder update this level belongs to, counted per subscription.
    pub sequence: u64,
    /// Time the ladder update was received.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Historical Bars
// =============================================================================

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalBar {
    /// Bar open time.
    pub date: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Traded volume.
    pub volume: Decimal,
    /// Number of trades in the bar, if reported.
    pub bar_count: Option<i64>,
    /// Volume-weighted average price, if reported.
    pub average: Option<Decimal>,
}

impl HistoricalBar {
    /// Build a bar from raw feed values, enforcing `high >= low` and
    /// `volume >= 0`.
    ///
    /// # Errors
    ///
    /// Returns an [`EventError`] when a price is not finite or an invariant
    /// is violated.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw(
        date: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        bar_count: Option<i64>,
        average: Option<f64>,
    ) -> Result<Self, EventError> {
        let open = require_finite(open, "open")?;
        let high = require_finite(high, "high")?;
        let low = require_finite(low, "low")?;
        let close = require_finite(close, "close")?;
        let volume = require_finite(volume, "volume")?;

        if high < low {
            return Err(EventError::InvertedBar { high, low });
        }
        if volume < Decimal::ZERO {
            return Err(EventError::NegativeVolume(volume));
        }

        Ok(Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            bar_count,
            average: average.and_then(price_or_unknown),
        })
    }
}

/// Response to one historical data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalBarBatch {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Requested duration (e.g. `1 D`).
    pub duration: String,
    /// Requested bar size (e.g. `1 min`).
    pub bar_size: String,
    /// Bars in feed order.
    pub bars: Vec<HistoricalBar>,
}

// =============================================================================
// Fundamental Report
// =============================================================================

/// Fundamental data report passed through uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundamentalReport {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Report kind as named by the feed (`ReportSnapshot`, `FinRatios`...).
    pub report_kind: String,
    /// Raw payload.
    pub payload: String,
    /// Time the report was received.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Queue Item
// =============================================================================

/// Every item that travels through the output queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MarketDataEvent {
    /// Changed top-of-book snapshot.
    TopOfBook(QuoteSnapshot),
    /// New tick-by-tick entry.
    TickByTick(TradeTick),
    /// One level of a full-ladder depth update.
    MarketDepth(DepthLevel),
    /// Historical bar response.
    HistoricalData(HistoricalBarBatch),
    /// Fundamental report response.
    FundamentalData(FundamentalReport),
}

impl MarketDataEvent {
    /// Symbol the event refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::TopOfBook(q) => &q.symbol,
            Self::TickByTick(t) => &t.symbol,
            Self::MarketDepth(d) => &d.symbol,
            Self::HistoricalData(h) => &h.symbol,
            Self::FundamentalData(f) => &f.symbol,
        }
    }

    /// Event type name, matching the serialized `event_type` tag.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::TopOfBook(_) => "top_of_book",
            Self::TickByTick(_) => "tick_by_tick",
            Self::MarketDepth(_) => "market_depth",
            Self::HistoricalData(_) => "historical_data",
            Self::FundamentalData(_) => "fundamental_data",
        }
    }
}

impl From<QuoteSnapshot> for MarketDataEvent {
    fn from(value: QuoteSnapshot) -> Self {
        Self::TopOfBook(value)
    }
}

impl From<TradeTick> for MarketDataEvent {
    fn from(value: TradeTick) -> Self {
        Self::TickByTick(value)
    }
}

impl From<DepthLevel> for MarketDataEvent {
    fn from(value: DepthLevel) -> Self {
        Self::MarketDepth(value)
    }
}

// =============================================================================
// Tests
// =============================================================================
