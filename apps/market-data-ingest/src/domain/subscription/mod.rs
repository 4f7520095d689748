//! Subscription Keys
//!
//! Domain types identifying a subscription. Exactly one active
//! subscription exists per [`SubscriptionKey`], i.e. per symbol and
//! stream kind.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::instrument::Symbol;
use super::streaming::TickKind;

// =============================================================================
// Types
// =============================================================================

/// Kind of real-time stream a subscription delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Polled top-of-book snapshots.
    Quotes,
    /// Tick-by-tick list of the given kind.
    Trades(TickKind),
    /// Standard market depth.
    Depth,
    /// Smart (aggregated) market depth.
    SmartDepth,
}

impl StreamKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Quotes => "quotes",
            Self::Trades(_) => "trades",
            Self::Depth => "depth",
            Self::SmartDepth => "smart_depth",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trades(kind) => write!(f, "trades:{kind}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Registry key: one subscription per symbol and stream kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Stream kind.
    pub kind: StreamKind,
}

impl SubscriptionKey {
    /// Create a key.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, kind: StreamKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.kind)
    }
}

/// Parameters a subscription was opened with.
///
/// Subscribing again with equal parameters returns the existing
/// subscription; different parameters replace it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamParams {
    /// Quotes and trades take no parameters.
    None,
    /// Depth subscriptions request a number of rows per side.
    Depth {
        /// Rows requested per side.
        rows: usize,
    },
}

/// Which depth capability actually backs a depth subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    /// Standard depth.
    Standard,
    /// Smart (aggregated) depth.
    Smart,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn trade_kinds_are_distinct_keys() {
        let mut keys = HashSet::new();
        keys.insert(SubscriptionKey::new("AAPL", StreamKind::Trades(TickKind::Last)));
        keys.insert(SubscriptionKey::new("AAPL", StreamKind::Trades(TickKind::Bid)));
        keys.insert(SubscriptionKey::new("AAPL", StreamKind::Trades(TickKind::Last)));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn depth_and_smart_depth_are_distinct_keys() {
        let a = SubscriptionKey::new("AAPL", StreamKind::Depth);
        let b = SubscriptionKey::new("AAPL", StreamKind::SmartDepth);
        assert_ne!(a, b);
    }

    #[test]
    fn display_formats() {
        assert_eq!(
            SubscriptionKey::new("MSFT", StreamKind::Trades(TickKind::Midpoint)).to_string(),
            "MSFT/trades:midpoint"
        );
        assert_eq!(
            SubscriptionKey::new("MSFT", StreamKind::SmartDepth).to_string(),
            "MSFT/smart_depth"
        );
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(StreamKind::Quotes.label(), "quotes");
        assert_eq!(StreamKind::Trades(TickKind::Ask).label(), "trades");
        assert_eq!(StreamKind::Depth.label(), "depth");
        assert_eq!(StreamKind::SmartDepth.label(), "smart_depth");
    }
}
